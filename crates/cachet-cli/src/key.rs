use cachet::core::entry_file_name;
use cachet::data::config::DEFAULT_CACHE_EXTENSION;
use cachet::{Method, Request};
use clap::Args;

#[derive(Clone, Debug, Args)]
pub struct KeyArg {
    pub url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    pub method: Method,
}

impl KeyArg {
    pub fn run(self) -> anyhow::Result<()> {
        let (key, file_name) = self.describe()?;
        println!("key:  {}", key.replace('\n', "\\n"));
        println!("file: {file_name}");
        Ok(())
    }

    fn describe(&self) -> cachet::Result<(String, String)> {
        let key = Request::new(self.method, &self.url)?.cache_key();
        let file_name = entry_file_name(&key, DEFAULT_CACHE_EXTENSION);
        Ok((key, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let arg = KeyArg {
            url:    "http://a.test/x".into(),
            method: Method::Post,
        };
        let (key, file_name) = arg.describe().unwrap();
        assert_eq!(key, "POST http://a.test/x");
        assert!(file_name.ends_with(".cache"));
        assert_eq!(file_name.len(), 64 + ".cache".len());
    }

    #[test]
    fn test_describe_rejects_bad_url() {
        let arg = KeyArg {
            url:    "not a url".into(),
            method: Method::Get,
        };
        assert!(arg.describe().is_err());
    }
}
