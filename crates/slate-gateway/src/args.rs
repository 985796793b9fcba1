//! Backend argument schemas and bound argument bags.
//!
//! Each backend advertises the option names it understands during the
//! handshake; the peer answers with one positional value per name. The bound
//! bag gives handlers typed access with per-option defaults, so a blank
//! value always means "use the default".

use crate::error::GatewayError;

/// The option name marking a peer as watch-only.
pub const READ_ONLY: &str = "read-only";

/// The ordered option names one backend understands.
#[derive(Debug, Clone, Copy)]
pub struct ArgsSchema {
    names: &'static [&'static str],
}

impl ArgsSchema {
    /// Wraps a static name list.
    #[must_use]
    pub const fn new(names: &'static [&'static str]) -> Self {
        Self { names }
    }

    /// The advertised names, in handshake order.
    #[must_use]
    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    /// Binds positional `connect` values to this schema.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Handshake`] if the value count does not match the
    /// advertised name count.
    pub fn bind(&self, values: &[&str]) -> Result<ArgBag, GatewayError> {
        if values.len() != self.names.len() {
            return Err(GatewayError::Handshake(format!(
                "expected {} connect values, got {}",
                self.names.len(),
                values.len()
            )));
        }
        Ok(ArgBag {
            entries: self
                .names
                .iter()
                .zip(values)
                .map(|(&name, &value)| (name, value.to_owned()))
                .collect(),
        })
    }
}

/// Values bound to a schema's names.
#[derive(Debug, Clone, Default)]
pub struct ArgBag {
    entries: Vec<(&'static str, String)>,
}

impl ArgBag {
    /// The raw value for `name`, if the schema advertised it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// String value, with `default` replacing a blank or absent one.
    #[must_use]
    pub fn string_or(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            Some(value) if !value.is_empty() => value.to_owned(),
            _ => default.to_owned(),
        }
    }

    /// Integer value, with `default` replacing anything blank or unparsable.
    #[must_use]
    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Boolean value: literal `"true"` is true, anything else (including
    /// blank) is false.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    /// Whether this peer asked to be watch-only.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.flag(READ_ONLY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: ArgsSchema = ArgsSchema::new(&["hostname", "port", "read-only", "color-depth"]);

    #[test]
    fn binds_positionally() {
        let bag = SCHEMA.bind(&["vnc.internal", "5901", "", "16"]).unwrap();
        assert_eq!(bag.get("hostname"), Some("vnc.internal"));
        assert_eq!(bag.int_or("port", 5900), 5901);
        assert_eq!(bag.int_or("color-depth", 24), 16);
        assert!(!bag.read_only());
    }

    #[test]
    fn blank_values_take_defaults() {
        let bag = SCHEMA.bind(&["", "", "", ""]).unwrap();
        assert_eq!(bag.string_or("hostname", "localhost"), "localhost");
        assert_eq!(bag.int_or("port", 5900), 5900);
    }

    #[test]
    fn unparsable_int_takes_default() {
        let bag = SCHEMA.bind(&["", "none", "", ""]).unwrap();
        assert_eq!(bag.int_or("port", 5900), 5900);
    }

    #[test]
    fn read_only_flag() {
        let bag = SCHEMA.bind(&["", "", "true", ""]).unwrap();
        assert!(bag.read_only());

        let bag = SCHEMA.bind(&["", "", "yes", ""]).unwrap();
        assert!(!bag.read_only());
    }

    #[test]
    fn count_mismatch_rejected() {
        assert!(matches!(
            SCHEMA.bind(&["host"]),
            Err(GatewayError::Handshake(_))
        ));
        assert!(matches!(
            SCHEMA.bind(&["", "", "", "", "extra"]),
            Err(GatewayError::Handshake(_))
        ));
    }

    #[test]
    fn unknown_name_absent() {
        let bag = SCHEMA.bind(&["", "", "", ""]).unwrap();
        assert_eq!(bag.get("password"), None);
        assert!(!bag.flag("password"));
    }
}
