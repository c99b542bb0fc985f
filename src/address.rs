use anyhow::{Result, anyhow};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::codec::Reader;
use crate::error::DecodeError;
use crate::protocol::AddressType;

/// decode_address reads DST.ADDR and DST.PORT for the given address type
/// and returns the textual address alongside the port. Domain names are
/// returned as-is; resolving them is left to the outbound connector.
pub fn decode_address(atyp: u8, reader: &mut Reader<'_>) -> Result<(String, u16), DecodeError> {
    let address = match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let bytes = reader.take(4, "DST.ADDR")?;
            format_ipv4([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
        Some(AddressType::DomainName) => {
            // First octet in DomainName contains the number of
            // octets to follow
            let len = reader.u8("DST.ADDR length")?;
            let domain = reader.take(len as usize, "DST.ADDR")?;
            String::from_utf8_lossy(domain).into_owned()
        }
        Some(AddressType::IPv6) => {
            let mut words = [0u32; 4];
            for word in words.iter_mut() {
                *word = reader.u32_be("DST.ADDR")?;
            }
            format_ipv6(words)
        }
        None => return Err(DecodeError::AddressType(atyp)),
    };

    let port = reader.u16_be("DST.PORT")?;

    Ok((address, port))
}

/// format_ipv4 renders four octets as dotted decimal
pub fn format_ipv4(octets: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

/// format_ipv6 renders an address given as four big-endian 32-bit words.
/// Each word becomes two 16-bit groups in lowercase hex without leading
/// zeros; groups are never compressed with `::`.
pub fn format_ipv6(words: [u32; 4]) -> String {
    words
        .iter()
        .flat_map(|word| [word >> 16, word & 0xffff])
        .map(|group| format!("{group:x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// encode_address writes DST.ADDR for `atyp`, the inverse of decode_address
pub fn encode_address(atyp: u8, address: &str, out: &mut Vec<u8>) -> Result<()> {
    match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let ip: Ipv4Addr = address
                .parse()
                .map_err(|e| anyhow!("invalid IPv4 address '{address}': {e}"))?;
            out.extend_from_slice(&ip.octets());
        }
        Some(AddressType::DomainName) => {
            let len = u8::try_from(address.len())
                .map_err(|_| anyhow!("domain name too long: {} bytes", address.len()))?;
            out.push(len);
            out.extend_from_slice(address.as_bytes());
        }
        Some(AddressType::IPv6) => {
            let ip: Ipv6Addr = address
                .parse()
                .map_err(|e| anyhow!("invalid IPv6 address '{address}': {e}"))?;
            out.extend_from_slice(&ip.octets());
        }
        None => return Err(anyhow!("unsupported address type: {atyp:#04x}")),
    }

    Ok(())
}
