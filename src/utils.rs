use crate::error::{Result, SweepError};

/// Parses `22`, `1-1000`, `22,80,8000-8010` into a sorted, deduplicated list.
pub fn parse_ports(port_spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in port_spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(SweepError::InvalidPort(port_spec.to_string()));
        }

        if let Some((start, end)) = part.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(SweepError::InvalidPort(part.to_string()));
            }
            ports.extend(start..=end);
        } else {
            ports.push(parse_port(part)?);
        }
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port(raw: &str) -> Result<u16> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SweepError::InvalidPort(raw.to_string()));
    }
    match raw.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err(SweepError::InvalidPort(raw.to_string())),
    }
}
