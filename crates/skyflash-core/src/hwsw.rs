//! The `.sys/hwsw.info` identity file stored on the device volume
//!
//! The file holds one `key="value"` pair per line, e.g.:
//!
//! ```text
//! hw="5mini"
//! sw="build-202401150930"
//! ```

/// Relative path of the identity file on the device volume
pub const HWSW_INFO_PATH: &str = ".sys/hwsw.info";

/// Hardware model key
pub const KEY_HARDWARE: &str = "hw";

/// Software build key
pub const KEY_SOFTWARE: &str = "sw";

/// Parsed identity file, keeping the original key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwSwInfo {
    entries: Vec<(String, String)>,
}

impl HwSwInfo {
    /// Parse the file content
    ///
    /// Lines that do not contain exactly one `=` are ignored; quotes are
    /// removed from values. A repeated key keeps the last value.
    pub fn parse(content: &str) -> Self {
        let mut info = Self::default();
        for line in content.lines() {
            let parts: Vec<&str> = line.split('=').collect();
            if let [key, value] = parts.as_slice() {
                info.set(key, &value.replace('"', ""));
            }
        }
        info
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a value, keeping the position of an existing key
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render back to file content, one `key="value"` line per entry
    pub fn render(&self) -> String {
        let mut lines = String::new();
        for (key, value) in &self.entries {
            lines.push_str(&format!("{}=\"{}\"\n", key, value));
        }
        lines
    }
}
