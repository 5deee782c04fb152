use crate::error::Error;
use std::io;

pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup<T: AsRef<str>>(&self, k: T) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k)?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k)?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get a numeric entry by path. Integers are accepted and converted.
    pub fn get_f64<T: AsRef<str>>(&self, k: T) -> Option<f64> {
        let item = self.lookup(k)?;
        item.as_float().or_else(|| item.as_integer().map(|i| i as f64))
    }

    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k)?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables if needed.
    /// Existing values are overwritten.
    pub fn set<T, V>(&mut self, k: T, v: V) -> Result<(), Error>
    where
        T: AsRef<str>,
        V: Into<toml::Value>,
    {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        let (last, parents) = keys
            .split_last()
            .ok_or(Error::Config("empty configuration key".to_owned()))?;
        let mut item = &mut self.value;
        for key in parents {
            let table = item
                .as_table_mut()
                .ok_or_else(|| Error::Config(format!("'{}' is not a table", key)))?;
            item = table
                .entry(key.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        }
        let table = item
            .as_table_mut()
            .ok_or_else(|| Error::Config(format!("cannot set '{}'", k.as_ref())))?;
        table.insert(last.to_string(), v.into());
        Ok(())
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::from_str::<toml::Table>(&s) {
            Ok(table) => {
                self.value = toml::Value::Table(table);
                Ok(())
            }
            Err(e) => Err(Error::Config(format!("load configuration failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn config_dotted_lookup() {
        let mut config = Config::default();
        let input = "[analysis]\nlatency_threshold_ms = 250\ndup_ack_threshold = 2\n";
        config.load_config(input.as_bytes()).unwrap();
        assert_eq!(config.get_f64("analysis.latency_threshold_ms"), Some(250.0));
        assert_eq!(config.get_usize("analysis.dup_ack_threshold"), Some(2));
        assert_eq!(config.get_usize("analysis.missing"), None);
    }

    #[test]
    fn config_set_overrides() {
        let mut config = Config::default();
        config.set("pipeline.batch_size", 32).unwrap();
        config.set("log_file", "out.log").unwrap();
        assert_eq!(config.get_usize("pipeline.batch_size"), Some(32));
        assert_eq!(config.get("log_file"), Some("out.log"));
        config.set("pipeline.batch_size", 8).unwrap();
        assert_eq!(config.get_usize("pipeline.batch_size"), Some(8));
    }

    #[test]
    fn config_invalid_toml() {
        let mut config = Config::default();
        assert!(config.load_config("[broken".as_bytes()).is_err());
    }
}
