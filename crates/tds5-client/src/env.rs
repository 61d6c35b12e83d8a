//! The connection's environment mapping (§3).
//!
//! An ordered mapping from well-known keys to values, seeded from
//! [`ConnectOptions`](crate::config::ConnectOptions) and kept up to date by
//! `envchange` tokens arriving in replies. The invariant: a key always
//! reflects the last value the server accepted, falling back to the
//! caller-supplied value if the server never touched it.

use crate::config::ConnectOptions;

/// Ordered key/value environment, upserted in place by `envchange` tokens.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: Vec<(String, String)>,
}

impl Environment {
    /// Seed an environment from the recognized keys of a connection's
    /// configuration.
    #[must_use]
    pub fn from_options(opts: &ConnectOptions) -> Self {
        let mut env = Self::default();
        env.upsert("host", opts.host.clone());
        env.upsert("port", opts.port.to_string());
        env.upsert("user", opts.user.clone());
        env.upsert("password", opts.password.clone());
        if let Some(database) = &opts.database {
            env.upsert("database", database.clone());
        }
        env.upsert("app_name", opts.app_name.clone());
        env.upsert("lib_name", opts.lib_name.clone());
        env.upsert("language", opts.language.clone());
        env.upsert("packet_size", opts.packet_size.to_string());
        env
    }

    /// Insert or overwrite a key, preserving its original position when it
    /// already exists.
    pub fn upsert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Look up a key's current value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Rebuild a [`ConnectOptions`] suitable for a reconnect, starting from
    /// the given base options and overlaying whatever the environment
    /// currently holds.
    #[must_use]
    pub fn to_options(&self, base: &ConnectOptions) -> ConnectOptions {
        let mut opts = base.clone();
        if let Some(host) = self.get("host") {
            opts.host = host.to_string();
        }
        if let Some(port) = self.get("port").and_then(|p| p.parse().ok()) {
            opts.port = port;
        }
        if let Some(user) = self.get("user") {
            opts.user = user.to_string();
        }
        if let Some(password) = self.get("password") {
            opts.password = password.to_string();
        }
        if let Some(database) = self.get("database") {
            opts.database = Some(database.to_string());
        }
        if let Some(app_name) = self.get("app_name") {
            opts.app_name = app_name.to_string();
        }
        if let Some(lib_name) = self.get("lib_name") {
            opts.lib_name = lib_name.to_string();
        }
        if let Some(language) = self.get("language") {
            opts.language = language.to_string();
        }
        if let Some(packet_size) = self.get("packet_size").and_then(|p| p.parse().ok()) {
            opts.packet_size = packet_size;
        }
        opts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seeds_from_options() {
        let opts = ConnectOptions::new().host("db1").database("accounting");
        let env = Environment::from_options(&opts);
        assert_eq!(env.get("host"), Some("db1"));
        assert_eq!(env.get("database"), Some("accounting"));
    }

    #[test]
    fn upsert_overwrites_in_place() {
        let mut env = Environment::default();
        env.upsert("packet_size", "512");
        env.upsert("language", "us_english");
        env.upsert("packet_size", "4096");

        let keys: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["packet_size", "language"]);
        assert_eq!(env.get("packet_size"), Some("4096"));
    }

    #[test]
    fn to_options_overlays_base() {
        let base = ConnectOptions::new().host("original").port(5000);
        let mut env = Environment::from_options(&base);
        env.upsert("packet_size", "4096");

        let rebuilt = env.to_options(&base);
        assert_eq!(rebuilt.host, "original");
        assert_eq!(rebuilt.packet_size, 4096);
    }
}
