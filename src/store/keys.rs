/// Key layout for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `channel_scans`: scan:{scan_id} -> ChannelScan (JSON)
/// - `channel_items`: item:{item_id} -> ChannelItem (JSON)
/// - `external`: ext:{media_id} -> ExternalMedia (JSON)
///
/// Job ids are UUIDv7, so iteration order within a partition is creation
/// order.

pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

pub fn encode_scan_key(scan_id: &str) -> Vec<u8> {
    format!("scan:{}", scan_id).into_bytes()
}

pub fn encode_item_key(item_id: &str) -> Vec<u8> {
    format!("item:{}", item_id).into_bytes()
}

pub fn encode_external_key(media_id: &str) -> Vec<u8> {
    format!("ext:{}", media_id).into_bytes()
}

pub fn decode_job_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("job:").map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_roundtrip() {
        let key = encode_job_key("0192f1a2-dead-beef");
        assert_eq!(key, b"job:0192f1a2-dead-beef");
        assert_eq!(decode_job_key(&key).unwrap(), "0192f1a2-dead-beef");
    }

    #[test]
    fn test_other_prefixes() {
        assert_eq!(encode_scan_key("s1"), b"scan:s1");
        assert_eq!(encode_item_key("i1"), b"item:i1");
        assert_eq!(encode_external_key("m1"), b"ext:m1");
    }
}
