use crate::config::StageConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub log: Option<String>,
    media_width: Option<u32>,
    media_height: Option<u32>,
}

impl CliArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = CliArgs::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => parsed.config = Some(PathBuf::from(value)),
                "script" => parsed.script = Some(PathBuf::from(value)),
                "log" => parsed.log = Some(value),
                "media-width" => {
                    parsed.media_width =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid media width '{value}'"))?);
                }
                "media-height" => {
                    parsed.media_height =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid media height '{value}'"))?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --script, --media-width, --media-height, --log."
                ),
            }
        }
        Ok(parsed)
    }

    pub fn config_overrides(&self) -> StageConfigOverrides {
        StageConfigOverrides { media_width: self.media_width, media_height: self.media_height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_media_size() {
        let args = [
            "stage",
            "--config",
            "cfg.json",
            "--script",
            "run.jsonl",
            "--media-width",
            "640",
            "--media-height",
            "480",
        ];
        let parsed = CliArgs::parse(args).expect("parse args");
        assert_eq!(parsed.config, Some(PathBuf::from("cfg.json")));
        assert_eq!(parsed.script, Some(PathBuf::from("run.jsonl")));
        let overrides = parsed.config_overrides();
        assert_eq!((overrides.media_width, overrides.media_height), (Some(640), Some(480)));
    }

    #[test]
    fn latest_flag_wins() {
        let parsed = CliArgs::parse(["stage", "--log", "info", "--log", "debug"]).expect("parse args");
        assert_eq!(parsed.log.as_deref(), Some("debug"));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliArgs::parse(["stage", "--script"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_numbers() {
        assert!(CliArgs::parse(["stage", "--width", "10"]).unwrap_err().to_string().contains("Unknown flag"));
        assert!(CliArgs::parse(["stage", "--media-width", "wide"]).is_err());
    }
}
