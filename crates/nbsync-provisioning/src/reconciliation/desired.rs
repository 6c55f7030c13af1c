//! Desired destination state derived from source instances.

use nbsync_connector::source::{Instance, InstanceDisk, InstanceInterface};
use tracing::warn;

use super::address::{with_cidr, AddressClass};
use super::normalize::normalize;

/// Platform used when the OS is unknown or unrecognised.
pub const DEFAULT_PLATFORM_SLUG: &str = "linux";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Desired state of one VM and its dependent records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredVm {
    pub name: String,
    pub source_id: String,
    pub folder_id: String,
    pub zone_id: Option<String>,
    pub status: &'static str,
    pub vcpus: u32,
    /// Memory in MB; zero when unknown and never written.
    pub memory_mb: u64,
    pub comments: String,
    pub platform_slug: &'static str,
    pub interfaces: Vec<DesiredInterface>,
    pub disks: Vec<DesiredDisk>,
}

/// Desired VM interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredInterface {
    pub name: String,
    pub addresses: Vec<DesiredAddress>,
}

/// Desired address on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAddress {
    /// Address with mask.
    pub address: String,
    pub class: AddressClass,
    pub description: &'static str,
}

/// Desired virtual disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredDisk {
    pub name: String,
    /// Size in MB; zero when unknown.
    pub size_mb: u64,
    pub description: String,
}

impl DesiredVm {
    /// Derive the desired state of an instance.
    #[must_use]
    pub fn from_instance(instance: &Instance) -> Self {
        let memory_mb = parse_memory_mb(instance.resources.memory.as_deref());
        if memory_mb == 0 && instance.resources.memory.is_some() {
            warn!(vm = %instance.name, memory = ?instance.resources.memory, "Could not derive memory size");
        }

        Self {
            name: instance.name.clone(),
            source_id: instance.id.clone(),
            folder_id: instance.folder_id.clone(),
            zone_id: instance.zone_id.clone().filter(|z| !z.is_empty()),
            status: vm_status(&instance.status),
            vcpus: parse_cores(instance.resources.cores.as_deref()),
            memory_mb,
            comments: vm_comments(instance),
            platform_slug: detect_platform_slug(instance.os.as_deref().unwrap_or_default()),
            interfaces: instance.interfaces.iter().map(desired_interface).collect(),
            disks: instance
                .disks
                .iter()
                .enumerate()
                .map(|(idx, disk)| desired_disk(idx, disk))
                .collect(),
        }
    }
}

fn desired_interface(interface: &InstanceInterface) -> DesiredInterface {
    let mut addresses = Vec::new();
    let sources = [
        (interface.primary_v4_address.as_deref(), AddressClass::Private),
        (interface.one_to_one_nat.as_deref(), AddressClass::Public),
    ];
    for (address, role) in sources {
        let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
            continue;
        };
        let address = with_cidr(address);
        addresses.push(DesiredAddress {
            class: AddressClass::of(&address),
            address,
            description: role.description(),
        });
    }
    DesiredInterface {
        name: format!("eth{}", interface.index),
        addresses,
    }
}

fn desired_disk(idx: usize, disk: &InstanceDisk) -> DesiredDisk {
    let name = if disk.name.trim().is_empty() {
        format!("disk-{idx}")
    } else {
        disk.name.clone()
    };
    DesiredDisk {
        name,
        size_mb: disk.size_bytes / MIB,
        description: format!("Type: {}", disk.kind.as_str()),
    }
}

/// Map a provider status to a destination status.
#[must_use]
pub fn vm_status(status: &str) -> &'static str {
    if status == "RUNNING" {
        "active"
    } else {
        "offline"
    }
}

fn digits(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Parse a memory quantity into MB.
///
/// Values below 1000 are GB, below 1 000 000 MB, anything larger bytes
/// (converted through GiB so the destination displays whole gigabytes).
#[must_use]
pub fn parse_memory_mb(raw: Option<&str>) -> u64 {
    let Some(value) = raw.and_then(digits) else {
        return 0;
    };
    if value < 1000 {
        value * 1000
    } else if value < 1_000_000 {
        value
    } else {
        (value as f64 / GIB as f64 * 1000.0).round() as u64
    }
}

/// Parse a core count, defaulting to one.
#[must_use]
pub fn parse_cores(raw: Option<&str>) -> u32 {
    raw.and_then(digits)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

fn vm_comments(instance: &Instance) -> String {
    let lines = [
        Some(format!("YC VM ID: {}", instance.id)),
        instance.zone_id.as_deref().map(|z| format!("Zone: {z}")),
        instance
            .platform_id
            .as_deref()
            .map(|p| format!("Hardware Platform: {p}")),
        instance.os.as_deref().map(|os| format!("OS: {os}")),
        instance.created_at.as_deref().map(|c| format!("Created: {c}")),
    ];
    let text = lines
        .into_iter()
        .flatten()
        .filter(|line| !line.trim_end().ends_with(':'))
        .collect::<Vec<_>>()
        .join("\n");
    normalize(Some(&text))
}

/// Detect the platform slug from an OS name.
#[must_use]
pub fn detect_platform_slug(os_name: &str) -> &'static str {
    let os = os_name.to_lowercase();
    let has = |needle: &str| os.contains(needle);

    if has("windows") {
        if has("2019") {
            "windows-2019"
        } else if has("2022") {
            "windows-2022"
        } else if has("2025") {
            "windows-2025"
        } else {
            "windows"
        }
    } else if has("ubuntu") {
        if has("24.04") || has("24-04") || has("noble") {
            "ubuntu-24-04"
        } else {
            "ubuntu-22-04"
        }
    } else if has("debian") {
        "debian-11"
    } else if has("centos") && has("7") {
        "centos-7"
    } else if has("alma") && has("9") {
        "almalinux-9"
    } else if has("oracle") && has("9") {
        "oracle-linux-9"
    } else {
        DEFAULT_PLATFORM_SLUG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbsync_connector::source::{DiskKind, InstanceResources};

    fn instance() -> Instance {
        Instance {
            id: "fhm123".to_string(),
            name: "web-1".to_string(),
            status: "RUNNING".to_string(),
            folder_id: "b1g-folder".to_string(),
            cloud_id: "b1g-cloud".to_string(),
            zone_id: Some("ru-central1-a".to_string()),
            resources: InstanceResources {
                memory: Some("4294967296".to_string()),
                cores: Some("2".to_string()),
            },
            disks: vec![InstanceDisk {
                id: Some("epd1".to_string()),
                name: "boot".to_string(),
                size_bytes: 20 * GIB,
                kind: DiskKind::Cloud,
            }],
            interfaces: vec![InstanceInterface {
                index: 0,
                subnet_id: Some("e9b-subnet".to_string()),
                primary_v4_address: Some("10.128.0.5".to_string()),
                one_to_one_nat: Some("51.250.10.1".to_string()),
            }],
            os: Some("ubuntu-22-04-lts".to_string()),
            platform_id: Some("standard-v3".to_string()),
            created_at: None,
        }
    }

    #[test]
    fn test_memory_units() {
        assert_eq!(parse_memory_mb(Some("4")), 4000);
        assert_eq!(parse_memory_mb(Some("2048")), 2048);
        assert_eq!(parse_memory_mb(Some("4294967296")), 4000);
        assert_eq!(parse_memory_mb(Some("2147483648")), 2000);
        assert_eq!(parse_memory_mb(Some("n/a")), 0);
        assert_eq!(parse_memory_mb(None), 0);
    }

    #[test]
    fn test_cores_default_to_one() {
        assert_eq!(parse_cores(Some("4")), 4);
        assert_eq!(parse_cores(None), 1);
        assert_eq!(parse_cores(Some("")), 1);
        assert_eq!(parse_cores(Some("0")), 1);
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(detect_platform_slug("Windows Server 2022 Datacenter"), "windows-2022");
        assert_eq!(detect_platform_slug("windows"), "windows");
        assert_eq!(detect_platform_slug("ubuntu-24-04-lts"), "ubuntu-24-04");
        assert_eq!(detect_platform_slug("Ubuntu 20.04"), "ubuntu-22-04");
        assert_eq!(detect_platform_slug("debian-12"), "debian-11");
        assert_eq!(detect_platform_slug("centos-7"), "centos-7");
        assert_eq!(detect_platform_slug("centos-stream-8"), "linux");
        assert_eq!(detect_platform_slug("almalinux-9"), "almalinux-9");
        assert_eq!(detect_platform_slug("oracle-linux-9"), "oracle-linux-9");
        assert_eq!(detect_platform_slug(""), "linux");
    }

    #[test]
    fn test_desired_vm_from_instance() {
        let vm = DesiredVm::from_instance(&instance());

        assert_eq!(vm.status, "active");
        assert_eq!(vm.vcpus, 2);
        assert_eq!(vm.memory_mb, 4000);
        assert_eq!(vm.platform_slug, "ubuntu-22-04");
        assert_eq!(
            vm.comments,
            "YC VM ID: fhm123\nZone: ru-central1-a\nHardware Platform: standard-v3\nOS: ubuntu-22-04-lts"
        );

        assert_eq!(vm.interfaces.len(), 1);
        let eth0 = &vm.interfaces[0];
        assert_eq!(eth0.name, "eth0");
        assert_eq!(eth0.addresses[0].address, "10.128.0.5/32");
        assert_eq!(eth0.addresses[0].class, AddressClass::Private);
        assert_eq!(eth0.addresses[0].description, "Private IP");
        assert_eq!(eth0.addresses[1].address, "51.250.10.1/32");
        assert_eq!(eth0.addresses[1].class, AddressClass::Public);
        assert_eq!(eth0.addresses[1].description, "Public IP (NAT)");

        assert_eq!(vm.disks[0].size_mb, 20 * 1024);
        assert_eq!(vm.disks[0].description, "Type: cloud");
    }

    #[test]
    fn test_stopped_vm_is_offline() {
        let mut source = instance();
        source.status = "STOPPED".to_string();
        source.interfaces.clear();
        assert_eq!(DesiredVm::from_instance(&source).status, "offline");
        assert!(DesiredVm::from_instance(&source).interfaces.is_empty());
    }
}
