//! Subscription feed decoding
//!
//! A feed is a URL-safe base64 document whose decoded form holds one
//! `ssr://` link per line. Each link is itself URL-safe base64 over
//! `host:port:protocol:method:obfs:base64(password)/?params`.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::models::{ServerDefaults, ServerDescriptor};

const LINK_PREFIX: &str = "ssr://";

/// Standard alphabet, padding optional
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode URL-safe base64 by mapping it onto the standard alphabet
pub fn decode_url_safe(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let normalized = input.trim().replace('_', "/").replace('-', "+");
    LENIENT.decode(normalized)
}

/// Decode a whole feed into servers
///
/// Only an undecodable outer payload is an error. Entries that fail to
/// parse are skipped.
pub fn parse_feed(payload: &[u8], defaults: &ServerDefaults) -> Result<Vec<ServerDescriptor>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| TetherError::Fetch("feed is not valid UTF-8".to_string()))?;

    let decoded = decode_url_safe(text)
        .map_err(|e| TetherError::Fetch(format!("feed is not valid base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| TetherError::Fetch("decoded feed is not valid UTF-8".to_string()))?;

    let mut servers = Vec::new();
    for (index, line) in decoded.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_link(line, defaults) {
            Ok(server) => servers.push(server),
            Err(e) => debug!(line = index + 1, "Skipping feed entry: {}", e),
        }
    }

    Ok(servers)
}

/// Parse one `ssr://` link
pub fn parse_link(link: &str, defaults: &ServerDefaults) -> Result<ServerDescriptor> {
    let encoded = link.strip_prefix(LINK_PREFIX).unwrap_or(link);

    let decoded = decode_url_safe(encoded)
        .map_err(|e| TetherError::Parse(format!("link is not valid base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| TetherError::Parse("link is not valid UTF-8".to_string()))?;

    let fields: Vec<&str> = decoded.split(':').collect();
    if fields.len() < 6 {
        return Err(TetherError::Parse(format!(
            "expected at least 6 fields, found {}",
            fields.len()
        )));
    }

    // The last five fields are fixed; anything before them is the host,
    // which lets unbracketed IPv6 literals through.
    let split = fields.len() - 5;
    let host = fields[..split].join(":");
    let (port, protocol, method, obfs, rest) = (
        fields[split],
        fields[split + 1],
        fields[split + 2],
        fields[split + 3],
        fields[split + 4],
    );

    if host.is_empty() {
        return Err(TetherError::Parse("empty host".to_string()));
    }

    let port: u16 = port
        .parse()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| TetherError::Parse(format!("invalid port for {}", host)))?;

    if method.is_empty() {
        return Err(TetherError::Parse(format!("missing method for {}", host)));
    }

    let password = decode_password(rest)
        .ok_or_else(|| TetherError::Parse(format!("invalid password for {}", host)))?;

    let mut server = ServerDescriptor::new(host, port, method, password, defaults);
    server.protocol = protocol.to_string();
    server.obfs = obfs.to_string();
    Ok(server)
}

/// Password segment is `base64(password)` optionally followed by `/?params`
fn decode_password(segment: &str) -> Option<String> {
    let encoded = match segment.find('?') {
        Some(idx) => &segment[..idx],
        None => segment,
    };
    let encoded = encoded.trim_end_matches('/');

    let bytes = decode_url_safe(encoded).ok()?;
    let password = String::from_utf8(bytes).ok()?;
    if password.is_empty() {
        None
    } else {
        Some(password)
    }
}
