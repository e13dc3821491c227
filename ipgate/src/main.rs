use clap::{Parser, Subcommand};
use ipgate::config::{ConfigValidator, RuleWarning};
use ipgate::{
    AccessGate, AccessRequest, AddressFamily, AddressMatcher, AllowListConfig, ConfigLoader,
    Decision, Ipv6BoundsPolicy, MatchError, RequestMeta, Verdict,
};
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ipgate")]
#[command(about = "IP allow-list gate for protected backend paths")]
struct Args {
    /// Config file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one request against the configured gate (exit 1 on deny)
    Check {
        /// Request path, already URL-decoded
        #[arg(long)]
        path: String,

        /// Request metadata field (repeatable), e.g. REMOTE_ADDR=192.0.2.1
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Match one address against one rule
    Match {
        address: String,
        rule: String,

        /// Address family: v4 | v6 (inferred from the address when omitted)
        #[arg(long, value_parser = parse_family)]
        family: Option<AddressFamily>,

        /// IPv6 bounds policy: group-padding | prefix
        #[arg(long, default_value = "group-padding", value_parser = parse_bounds)]
        ipv6_bounds: Ipv6BoundsPolicy,
    },

    /// Validate the configuration and report suspicious rules
    Lint,
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

fn parse_family(s: &str) -> Result<AddressFamily, String> {
    AddressFamily::parse(s).ok_or_else(|| format!("unknown address family: {s}"))
}

fn parse_bounds(s: &str) -> Result<Ipv6BoundsPolicy, String> {
    Ipv6BoundsPolicy::parse(s).ok_or_else(|| format!("unknown IPv6 bounds policy: {s}"))
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_env_var("IPGATE_LOG")
        .from_env_lossy()
        .add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Check { path, meta } => {
            let decision = run_check(args.config, path, meta)?;
            println!("{}", decision);
            Ok(ExitCode::from(exit_status(decision.verdict())))
        }

        Command::Match {
            address,
            rule,
            family,
            ipv6_bounds,
        } => {
            let matched = match run_match(&address, &rule, family, ipv6_bounds) {
                Ok(matched) => matched,
                Err(e) => {
                    tracing::debug!("{}", e);
                    if args.verbose {
                        eprintln!("{}", e);
                    }
                    false
                }
            };
            println!("{}", matched);
            Ok(ExitCode::SUCCESS)
        }

        Command::Lint => {
            let report = run_lint(args.config)?;
            print!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Exit status for `check`: 0 on allow, 1 on deny
fn exit_status(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Allow => 0,
        Verdict::Deny => 1,
    }
}

fn run_check(
    config: Option<PathBuf>,
    path: String,
    meta: Vec<(String, String)>,
) -> ipgate::Result<Decision> {
    let config = ConfigLoader::load_or_default(config)?;
    for warning in ConfigValidator::lint_rules(&config.gate) {
        tracing::warn!("{}", warning);
    }
    let gate = AccessGate::from_settings(&config.gate)?;

    let request = AccessRequest::new(path, meta.into_iter().collect::<RequestMeta>());
    Ok(gate.decide(&request))
}

/// Match one address against one rule, inferring the family from the address
/// when none is given
fn run_match(
    address: &str,
    rule: &str,
    family: Option<AddressFamily>,
    ipv6_bounds: Ipv6BoundsPolicy,
) -> Result<bool, MatchError> {
    let family = family.unwrap_or_else(|| AddressFamily::infer(address));
    AddressMatcher::with_ipv6_bounds(ipv6_bounds).try_matches(address, rule, family)
}

/// What `lint` found in a configuration that passed validation
struct LintReport {
    allow_list: AllowListConfig,
    warnings: Vec<RuleWarning>,
}

impl LintReport {
    fn invalid_rules(&self) -> usize {
        self.allow_list
            .ipv4_rules()
            .iter()
            .chain(self.allow_list.ipv6_rules())
            .filter(|r| !r.rule().is_valid())
            .count()
    }
}

impl fmt::Display for LintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protected path: {}", self.allow_list.protected_path().as_str())?;
        writeln!(f, "IPv6 bounds: {}", self.allow_list.ipv6_bounds())?;

        let families = [
            (AddressFamily::Ipv4, self.allow_list.ipv4_rules()),
            (AddressFamily::Ipv6, self.allow_list.ipv6_rules()),
        ];
        for (family, rules) in families {
            for configured in rules {
                writeln!(f, "{} {:?}: {}", family, configured.raw(), configured.rule().kind())?;
            }
        }

        for warning in &self.warnings {
            writeln!(f, "warning: {}", warning)?;
        }
        writeln!(
            f,
            "{} IPv4 rule(s), {} IPv6 rule(s), {} not usable as ranges, {} warning(s)",
            self.allow_list.ipv4_rules().len(),
            self.allow_list.ipv6_rules().len(),
            self.invalid_rules(),
            self.warnings.len()
        )
    }
}

fn run_lint(config: Option<PathBuf>) -> ipgate::Result<LintReport> {
    let config = ConfigLoader::load_or_default(config)?;
    let allow_list = AllowListConfig::from_settings(&config.gate)?;
    let warnings = ConfigValidator::lint_rules(&config.gate);
    Ok(LintReport {
        allow_list,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipgate::{GateError, ValidationError};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn meta(address: &str) -> Vec<(String, String)> {
        vec![("REMOTE_ADDR".to_string(), address.to_string())]
    }

    const RULES: &str = r#"
[gate.allowed_ips]
ipv4 = ["192.168.1.0/24", "10.0.0.1", "10.0.*.*/16"]
ipv6 = ["2001:db8::/48"]
"#;

    #[test]
    fn test_check_exit_status() {
        let file = config_file(RULES);
        let path = || Some(file.path().to_path_buf());

        let allowed = run_check(path(), "/neos/login".to_string(), meta("192.168.1.200")).unwrap();
        assert_eq!(allowed.verdict(), Verdict::Allow);
        assert_eq!(exit_status(allowed.verdict()), 0);

        let denied = run_check(path(), "/neos/login".to_string(), meta("192.168.2.1")).unwrap();
        assert_eq!(denied.verdict(), Verdict::Deny);
        assert_eq!(exit_status(denied.verdict()), 1);

        let unprotected = run_check(path(), "/assets/app.js".to_string(), meta("192.168.2.1")).unwrap();
        assert_eq!(exit_status(unprotected.verdict()), 0);
    }

    #[test]
    fn test_check_fails_on_invalid_config() {
        let file = config_file(
            r#"
[gate]
login_uri_regex = "^(neos"
"#,
        );
        let result = run_check(Some(file.path().to_path_buf()), "/neos".to_string(), meta("10.0.0.1"));
        assert!(matches!(result, Err(GateError::InvalidPattern { .. })));
    }

    #[test]
    fn test_match_infers_family() {
        let bounds = Ipv6BoundsPolicy::GroupPadding;
        assert_eq!(run_match("10.1.2.3", "10.0.0.0/8", None, bounds), Ok(true));
        assert_eq!(run_match("2001:db8:5::1", "2001:db8::/32", None, bounds), Ok(true));
        assert_eq!(run_match("2001:db9::1", "2001:db8::/32", None, bounds), Ok(false));

        // An IPv6 address against an IPv4 rule is malformed once the family is forced
        assert!(matches!(
            run_match("::1", "0.0.0.0/0", Some(AddressFamily::Ipv4), bounds),
            Err(MatchError::MalformedAddress { .. })
        ));
        assert_eq!(
            run_match("2001:db8:1::1", "2001:db8::/48", None, Ipv6BoundsPolicy::Prefix),
            Ok(false)
        );
    }

    #[test]
    fn test_lint_report() {
        let file = config_file(RULES);
        let report = run_lint(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(report.invalid_rules(), 2);
        assert_eq!(report.warnings.len(), 2);

        let text = report.to_string();
        assert!(text.contains("protected path: ^(neos)?($|/)"));
        assert!(text.contains("IPv4 \"192.168.1.0/24\": cidr-prefix"));
        assert!(text.contains("IPv4 \"10.0.0.1\": invalid"));
        assert!(text.contains("IPv6 \"2001:db8::/48\": ipv6-cidr"));
        assert!(text.contains("3 IPv4 rule(s), 1 IPv6 rule(s), 2 not usable as ranges, 2 warning(s)"));
    }

    #[test]
    fn test_lint_fails_on_duplicate_rank() {
        let file = config_file(
            r#"
[[gate.allowed_ips.address_sources]]
rank = 0
path = "REMOTE_ADDR"

[[gate.allowed_ips.address_sources]]
rank = 0
path = "HTTP_X_FORWARDED_FOR"
"#,
        );
        let result = run_lint(Some(file.path().to_path_buf()));
        assert!(matches!(
            result,
            Err(GateError::Validation(ValidationError::DuplicateRank { rank: 0 }))
        ));
    }

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("REMOTE_ADDR=192.0.2.1").unwrap(),
            ("REMOTE_ADDR".to_string(), "192.0.2.1".to_string())
        );
        assert_eq!(parse_meta("EMPTY=").unwrap().1, "");
        assert!(parse_meta("novalue").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "ipgate",
            "check",
            "--path",
            "/neos",
            "--meta",
            "REMOTE_ADDR=10.0.0.1",
        ])
        .unwrap();
        match args.command {
            Command::Check { path, meta } => {
                assert_eq!(path, "/neos");
                assert_eq!(meta.len(), 1);
            }
            other => panic!("Expected Check, got {other:?}"),
        }

        let args = Args::try_parse_from(["ipgate", "match", "::1", "::/0", "--family", "v6"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Match {
                family: Some(AddressFamily::Ipv6),
                ipv6_bounds: Ipv6BoundsPolicy::GroupPadding,
                ..
            }
        ));
    }
}
