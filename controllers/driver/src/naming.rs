//! Deterministic names for per-pool driver objects.
//!
//! Names are `<prefix>-<hash>` where the hash covers the NVIDIADriver name
//! and the pool name. When the result exceeds the length limit the prefix is
//! cut, never the hash, so two pools can never collapse onto one name.

use std::hash::Hasher;

use crds::DriverType;
use fnv::FnvHasher;

/// Limit for resource names (DNS subdomain)
pub const MAX_RESOURCE_NAME_LEN: usize = 253;
/// Limit for label values and DNS labels
pub const MAX_APP_NAME_LEN: usize = 63;

const HASH_LEN: usize = 8;

/// 8 hex digit FNV-1a hash of the parts joined with `/`
pub fn short_hash(parts: &[&str]) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(parts.join("/").as_bytes());
    let hex = format!("{:016x}", hasher.finish());
    hex[..HASH_LEN].to_string()
}

/// Join `prefix` and `hash`, cutting the prefix so the result fits `max_len`.
pub fn truncate_with_hash(prefix: &str, hash: &str, max_len: usize) -> String {
    if prefix.len() + 1 + hash.len() <= max_len {
        return format!("{prefix}-{hash}");
    }
    let budget = max_len.saturating_sub(hash.len() + 1);
    let mut cut = 0;
    for (index, ch) in prefix.char_indices() {
        if index + ch.len_utf8() > budget {
            break;
        }
        cut = index + ch.len_utf8();
    }
    let trimmed = prefix[..cut].trim_end_matches(['-', '.']);
    if trimmed.is_empty() {
        hash.to_string()
    } else {
        format!("{trimmed}-{hash}")
    }
}

fn base_name(driver_type: DriverType, driver_name: &str, pool_name: &str) -> String {
    format!("nvidia-{driver_type}-driver-{driver_name}-{pool_name}")
}

/// DaemonSet name for a pool
pub fn daemonset_name(driver_type: DriverType, driver_name: &str, pool_name: &str) -> String {
    truncate_with_hash(
        &base_name(driver_type, driver_name, pool_name),
        &short_hash(&[driver_name, pool_name]),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// `app` label value for a pool's driver pods
pub fn app_name(driver_type: DriverType, driver_name: &str, pool_name: &str) -> String {
    truncate_with_hash(
        &base_name(driver_type, driver_name, pool_name),
        &short_hash(&[driver_name, pool_name]),
        MAX_APP_NAME_LEN,
    )
}

/// Name shared by the ServiceAccount and RBAC objects of one NVIDIADriver
pub fn service_account_name(driver_name: &str) -> String {
    truncate_with_hash(
        &format!("nvidia-driver-{driver_name}"),
        &short_hash(&[driver_name]),
        MAX_RESOURCE_NAME_LEN,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_stable_and_distinct() {
        assert_eq!(short_hash(&["default", "ubuntu22.04"]), short_hash(&["default", "ubuntu22.04"]));
        assert_ne!(short_hash(&["default", "ubuntu22.04"]), short_hash(&["default", "ubuntu20.04"]));
        assert_eq!(short_hash(&["a"]).len(), 8);
    }

    #[test]
    fn test_short_names_are_not_truncated() {
        let name = daemonset_name(DriverType::Gpu, "default", "ubuntu22.04");
        let hash = short_hash(&["default", "ubuntu22.04"]);
        assert_eq!(name, format!("nvidia-gpu-driver-default-ubuntu22.04-{hash}"));
    }

    #[test]
    fn test_truncation_keeps_hash_suffix() {
        let pool = "ubuntu22.04-5.15.0-1040-azure-with-a-very-long-kernel-flavour-name";
        let name = app_name(DriverType::VgpuHostManager, "cluster-wide-driver", pool);
        let hash = short_hash(&["cluster-wide-driver", pool]);

        assert!(name.len() <= MAX_APP_NAME_LEN);
        assert!(name.ends_with(&format!("-{hash}")));
        assert!(name.starts_with("nvidia-vgpu-host-manager-driver-"));
        assert_eq!(name, app_name(DriverType::VgpuHostManager, "cluster-wide-driver", pool));
    }

    #[test]
    fn test_truncation_distinguishes_pools_with_shared_prefix() {
        let long = "x".repeat(80);
        let a = app_name(DriverType::Gpu, &long, "rhel9.2");
        let b = app_name(DriverType::Gpu, &long, "rhel9.4");
        assert_ne!(a, b);
        assert_eq!(a.len(), MAX_APP_NAME_LEN);
    }

    #[test]
    fn test_truncation_trims_separator_at_cut() {
        // cut lands right after a '-' which must not produce "--"
        let name = truncate_with_hash("abcd-efgh", "12345678", 14);
        assert_eq!(name, "abcd-12345678");
    }

    #[test]
    fn test_resource_name_limit() {
        let long = "n".repeat(300);
        let name = daemonset_name(DriverType::Gpu, &long, "ubuntu22.04");
        assert_eq!(name.len(), MAX_RESOURCE_NAME_LEN);
        assert!(name.ends_with(&short_hash(&[&long, "ubuntu22.04"])));
    }
}
