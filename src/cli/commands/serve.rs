//! Server command.

use console::style;

use crate::config::Settings;

/// Start the worker-facing server.
pub async fn cmd_serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind, settings.port)?;
    let settings = Settings {
        host,
        port,
        ..settings.clone()
    };

    println!(
        "{} Starting orchestrator at http://{}:{}",
        style("→").cyan(),
        settings.host,
        settings.port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(&settings).await
}

/// Parse a bind address that can be:
/// - Just a port: "3070" -> 127.0.0.1:3070
/// - Just a host: "0.0.0.0" -> 0.0.0.0:<default>
/// - Host and port: "0.0.0.0:3070"
fn parse_bind_address(bind: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    Ok((bind.to_string(), default_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_address_port_only() {
        assert_eq!(
            parse_bind_address("8080", 3070).unwrap(),
            ("127.0.0.1".to_string(), 8080)
        );
    }

    #[test]
    fn test_parse_bind_address_host_port() {
        assert_eq!(
            parse_bind_address("0.0.0.0:9000", 3070).unwrap(),
            ("0.0.0.0".to_string(), 9000)
        );
    }

    #[test]
    fn test_parse_bind_address_host_only() {
        assert_eq!(
            parse_bind_address("0.0.0.0", 3070).unwrap(),
            ("0.0.0.0".to_string(), 3070)
        );
    }
}
