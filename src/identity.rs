//! 标识派生
//! 从数据源范围内的自然键确定性地派生 128 位 UUID 形态的标识

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 自然键各段之间的分隔符
pub const KEY_SEPARATOR: &str = ":";

/// 从自然键派生稳定标识
///
/// SHA-256 摘要截取前 16 字节，固定版本位（5）与 RFC 4122 变体位。
/// 纯函数：不做任何规范化，同一个键在任何进程、任何调用顺序下得到同一个 id。
/// 自然键的规范化（去空白、大小写、去掉 CIDR 后缀等）由数据源负责。
pub fn assign(natural_key: &str) -> Uuid {
    let digest = Sha256::digest(natural_key.as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);

    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// 用分隔符拼接自然键，例如 `["proxmox-node", "homelab", "pve"]` -> `proxmox-node:homelab:pve`
///
/// 第一段应为数据源类别前缀，用于避免不同数据源之间的键冲突。
pub fn natural_key(parts: &[&str]) -> String {
    parts.join(KEY_SEPARATOR)
}

/// 先拼接自然键再派生标识
pub fn assign_parts(parts: &[&str]) -> Uuid {
    assign(&natural_key(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_assign_is_deterministic() {
        let a = assign("proxmox-node:homelab:pve");
        let b = assign("proxmox-node:homelab:pve");
        assert_eq!(a, b);
    }

    #[test]
    fn test_assign_sets_version_and_variant() {
        let id = assign("k8s-node:prod:worker-1");
        assert_eq!(id.get_version_num(), 5);
        assert_eq!(id.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn test_assign_does_not_normalize() {
        assert_ne!(assign("proxmox-node:homelab:pve"), assign("proxmox-node:homelab:PVE"));
        assert_ne!(assign("proxmox-node:homelab:pve"), assign(" proxmox-node:homelab:pve"));
    }

    #[test]
    fn test_natural_key_join() {
        assert_eq!(
            natural_key(&["proxmox-node", "homelab", "pve"]),
            "proxmox-node:homelab:pve"
        );
        assert_eq!(
            assign_parts(&["proxmox-node", "homelab", "pve"]),
            assign("proxmox-node:homelab:pve")
        );
    }

    #[test]
    fn test_distinct_keys_over_large_corpus() {
        let mut seen = HashSet::new();
        for cluster in 0..20 {
            for local in 0..2_500 {
                let key = format!("k8s-deployment:cluster-{}:default:app-{}", cluster, local);
                assert!(seen.insert(assign(&key)), "collision for {}", key);
            }
        }
        assert_eq!(seen.len(), 50_000);
    }

    proptest! {
        #[test]
        fn prop_same_key_same_id(key in ".{0,64}") {
            prop_assert_eq!(assign(&key), assign(&key));
        }

        #[test]
        fn prop_different_keys_different_ids(a in "[a-z0-9:-]{1,40}", b in "[a-z0-9:-]{1,40}") {
            prop_assume!(a != b);
            prop_assert_ne!(assign(&a), assign(&b));
        }
    }
}
