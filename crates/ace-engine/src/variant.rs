use regex::Regex;
use std::sync::OnceLock;

fn http_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--http-port=(\d+)").unwrap())
}

fn https_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--https-port=(\d+)").unwrap())
}

/// The three container-spec shapes an operator may pick for the AceStream
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVariant {
    /// `CONF` env string plus separate `HTTP_PORT`/`HTTPS_PORT` vars.
    ConfString,
    /// A single `ACESTREAM_ARGS` env var holding the full argv.
    EnvArgs,
    /// Ports passed as a container command vector.
    Cmd,
}

impl Default for EngineVariant {
    fn default() -> Self {
        EngineVariant::ConfString
    }
}

impl std::str::FromStr for EngineVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conf" | "conf_string" | "a" => Ok(EngineVariant::ConfString),
            "args" | "env_args" | "b" => Ok(EngineVariant::EnvArgs),
            "cmd" | "c" => Ok(EngineVariant::Cmd),
            other => Err(format!("unrecognized engine variant: {other}")),
        }
    }
}

/// Parse `--http-port=` / `--https-port=` out of a user-supplied `CONF`
/// string. Returns `(http, https)`, either side `None` if absent.
pub fn parse_ports_from_conf(conf: &str) -> (Option<u16>, Option<u16>) {
    let http = http_port_re().captures(conf).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok());
    let https = https_port_re().captures(conf).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok());
    (http, https)
}

/// Build a `CONF` string for the ports the orchestrator allocated. The
/// inverse of [`parse_ports_from_conf`] for the pair it emits — round-
/// tripping the two is a testable property (spec.md §8).
pub fn build_conf_string(http_port: u16, https_port: u16) -> String {
    format!("--http-port={http_port}\n--https-port={https_port}\n--bind-all")
}

/// Builds the `ACESTREAM_ARGS` value for [`EngineVariant::EnvArgs`].
pub fn build_args_string(http_port: u16, https_port: u16, p2p_port: Option<u16>) -> String {
    let mut args = format!("--http-port {http_port} --https-port {https_port}");
    if let Some(p2p) = p2p_port {
        args.push_str(&format!(" --port {p2p}"));
    }
    args
}

/// Builds the command vector for [`EngineVariant::Cmd`].
pub fn build_cmd_vector(http_port: u16, https_port: u16, p2p_port: Option<u16>) -> Vec<String> {
    let mut cmd = vec![
        "--http-port".to_owned(),
        http_port.to_string(),
        "--https-port".to_owned(),
        https_port.to_string(),
    ];
    if let Some(p2p) = p2p_port {
        cmd.push("--port".to_owned());
        cmd.push(p2p.to_string());
    }
    cmd
}

/// Validates ports extracted from a user-supplied `CONF` string: must be
/// in range and HTTP/HTTPS must not collide (spec.md SUPPLEMENTED BEHAVIOR
/// #4, grounded on `_validate_user_ports`).
pub fn validate_user_ports(http: Option<u16>, https: Option<u16>) -> Result<(), String> {
    if let (Some(h), Some(s)) = (http, https) {
        if h == s {
            return Err(format!("http-port and https-port must differ, both were {h}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_ports() {
        let conf = "--http-port=6878\n--https-port=6879\n--bind-all";
        assert_eq!(parse_ports_from_conf(conf), (Some(6878), Some(6879)));
    }

    #[test]
    fn missing_ports_are_none() {
        assert_eq!(parse_ports_from_conf("--bind-all"), (None, None));
    }

    #[test]
    fn conf_round_trips_through_build_and_parse() {
        let conf = build_conf_string(41000, 46000);
        assert_eq!(parse_ports_from_conf(&conf), (Some(41000), Some(46000)));
    }

    #[test]
    fn rejects_colliding_user_ports() {
        assert!(validate_user_ports(Some(6878), Some(6878)).is_err());
    }
}
