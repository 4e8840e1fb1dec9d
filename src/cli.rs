use std::env;

const DEFAULT_PORT: u16 = 7171;

/// Parsed startup configuration. Each field resolves with precedence
/// flag > environment variable > built-in default.
#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub verbose: bool,
    pub quiet: bool,
    pub restaurant_id: String,
    pub device_name: String,
    pub firebase_project: String,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            allowed_origins: Vec::new(),
            verbose: false,
            quiet: false,
            restaurant_id: String::new(),
            device_name: String::new(),
            firebase_project: String::new(),
        }
    }
}

/// Returned when `--help`/`-h` is present; the caller prints it and exits.
pub const HELP_TEXT: &str = "\
printer-bridge: local bridge that dispatches print jobs to TCP, USB, and OS-spooler printers

USAGE:
    printer-bridge [OPTIONS]

OPTIONS:
    --port <PORT>                 Port to listen on [env: PORT] [default: 7171]
    --host <HOST>                 Host/interface to bind [default: 0.0.0.0]
    --allowed-origins <LIST>      Comma-separated list of allowed WS origins [env: ALLOWED_ORIGINS]
    --verbose                     Enable debug logging [env: VERBOSE=1]
    --quiet                       Suppress info-level logging
    --restaurant-id <ID>          Initial restaurant id [env: RESTAURANT_ID]
    --device-name <NAME>          Initial device name [env: DEVICE_NAME]
    --firebase-project <ID>       Firestore project id [env: FIREBASE_PROJECT]
    -h, --help                    Print this help text and exit
";

impl Cli {
    /// Parse from explicit args (excluding argv[0]) and the process
    /// environment. Returns `Err(HELP_TEXT)` if help was requested.
    pub fn parse(args: &[String]) -> Result<Cli, &'static str> {
        Self::parse_from(args, &EnvSource)
    }

    fn parse_from(args: &[String], env: &dyn EnvLookup) -> Result<Cli, &'static str> {
        let mut cli = Cli {
            host: "0.0.0.0".to_string(),
            port: env
                .get("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            allowed_origins: env
                .get("ALLOWED_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or_default(),
            verbose: env.get("VERBOSE").as_deref() == Some("1"),
            quiet: false,
            restaurant_id: env.get("RESTAURANT_ID").unwrap_or_default(),
            device_name: env.get("DEVICE_NAME").unwrap_or_default(),
            firebase_project: env.get("FIREBASE_PROJECT").unwrap_or_default(),
        };

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "-h" | "--help" => return Err(HELP_TEXT),
                "--port" => {
                    i += 1;
                    cli.port = args.get(i).and_then(|v| v.parse().ok()).unwrap_or(cli.port);
                }
                "--host" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cli.host = v.clone();
                    }
                }
                "--allowed-origins" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cli.allowed_origins = split_origins(v);
                    }
                }
                "--verbose" => cli.verbose = true,
                "--quiet" => cli.quiet = true,
                "--restaurant-id" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cli.restaurant_id = v.clone();
                    }
                }
                "--device-name" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cli.device_name = v.clone();
                    }
                }
                "--firebase-project" => {
                    i += 1;
                    if let Some(v) = args.get(i) {
                        cli.firebase_project = v.clone();
                    }
                }
                _ => {}
            }
            i += 1;
        }

        Ok(cli)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

struct EnvSource;

impl EnvLookup for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvLookup for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cli = Cli::parse_from(&[], &MapEnv(HashMap::new())).unwrap();
        assert_eq!(cli.port, DEFAULT_PORT);
        assert_eq!(cli.host, "0.0.0.0");
        assert!(cli.allowed_origins.is_empty());
        assert!(!cli.verbose);
    }

    #[test]
    fn env_var_overrides_default() {
        let env = MapEnv(HashMap::from([("PORT", "9000")]));
        let cli = Cli::parse_from(&[], &env).unwrap();
        assert_eq!(cli.port, 9000);
    }

    #[test]
    fn flag_overrides_env_var() {
        let env = MapEnv(HashMap::from([("PORT", "9000")]));
        let args = vec!["--port".to_string(), "9100".to_string()];
        let cli = Cli::parse_from(&args, &env).unwrap();
        assert_eq!(cli.port, 9100);
    }

    #[test]
    fn allowed_origins_env_is_comma_split() {
        let env = MapEnv(HashMap::from([(
            "ALLOWED_ORIGINS",
            "https://a.example.com, https://b.example.com",
        )]));
        let cli = Cli::parse_from(&[], &env).unwrap();
        assert_eq!(
            cli.allowed_origins,
            vec!["https://a.example.com".to_string(), "https://b.example.com".to_string()]
        );
    }

    #[test]
    fn help_flag_short_circuits_with_help_text() {
        let args = vec!["--help".to_string()];
        let result = Cli::parse_from(&args, &MapEnv(HashMap::new()));
        assert_eq!(result, Err(HELP_TEXT));
    }

    #[test]
    fn verbose_env_requires_exact_value_one() {
        let env = MapEnv(HashMap::from([("VERBOSE", "true")]));
        let cli = Cli::parse_from(&[], &env).unwrap();
        assert!(!cli.verbose);

        let env = MapEnv(HashMap::from([("VERBOSE", "1")]));
        let cli = Cli::parse_from(&[], &env).unwrap();
        assert!(cli.verbose);
    }
}
