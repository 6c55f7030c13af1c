//! Yandex Cloud source client
//!
//! Implements [`SourceRepository`] over the Compute, Resource Manager and
//! VPC REST APIs. Listings follow `nextPageToken` until exhausted. Folders
//! are fetched once per client and shared by the folder-scoped listings.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::source::{
    Cloud, DiskKind, Folder, Instance, InstanceDisk, InstanceInterface, InstanceResources,
    Subnet, Zone,
};
use nbsync_connector::traits::SourceRepository;

use crate::config::{YandexConfig, YandexService};
use crate::transport::Transport;

// =============================================================================
// Wire types
// =============================================================================

/// Accept int64 values sent either as JSON strings or numbers.
fn quantity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiZone {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNamed {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSubnet {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    network_id: String,
    #[serde(default)]
    v4_cidr_blocks: Vec<String>,
    zone_id: Option<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResources {
    #[serde(default, deserialize_with = "quantity")]
    memory: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    cores: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttachedDisk {
    disk_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLocalDisk {
    #[serde(default, deserialize_with = "quantity")]
    size: Option<String>,
    device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNat {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiV4Address {
    address: Option<String>,
    one_to_one_nat: Option<ApiNat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInterface {
    subnet_id: Option<String>,
    primary_v4_address: Option<ApiV4Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInstance {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    zone_id: Option<String>,
    platform_id: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    resources: ApiResources,
    boot_disk: Option<ApiAttachedDisk>,
    #[serde(default)]
    secondary_disks: Vec<ApiAttachedDisk>,
    #[serde(default)]
    local_disks: Vec<ApiLocalDisk>,
    #[serde(default)]
    network_interfaces: Vec<ApiInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDisk {
    id: String,
    name: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    size: Option<String>,
    source_image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiImage {
    name: Option<String>,
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> ConnectorResult<T> {
    serde_json::from_value(value).map_err(|e| ConnectorError::Serialization {
        message: format!("Failed to decode {what}: {e}"),
    })
}

fn parse_size(size: Option<&str>) -> u64 {
    size.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

// =============================================================================
// Client
// =============================================================================

/// Yandex Cloud REST client.
pub struct YandexCloudClient {
    config: YandexConfig,
    transport: Transport,
    folders: OnceCell<Vec<Folder>>,
}

impl std::fmt::Debug for YandexCloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YandexCloudClient")
            .field("config", &self.config)
            .finish()
    }
}

impl YandexCloudClient {
    /// Create a client.
    pub fn new(config: YandexConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let transport = Transport::new(
            format!("Bearer {}", config.token),
            config.timeout_secs,
            config.retry.clone(),
        )?;

        Ok(Self {
            config,
            transport,
            folders: OnceCell::new(),
        })
    }

    /// Fetch every page of a listing and return the items under `key`.
    async fn list_paged(
        &self,
        service: YandexService,
        path: &str,
        key: &str,
        params: &[(&str, &str)],
    ) -> ConnectorResult<Vec<Value>> {
        let url = self.config.url(service, path);
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut items = Vec::new();

        loop {
            let mut page = self.transport.get(&url, &query, None).await?;
            if let Some(Value::Array(batch)) = page.get_mut(key).map(Value::take) {
                items.extend(batch);
            }

            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => {
                    let token = token.to_string();
                    query.retain(|(k, _)| k != "pageToken");
                    query.push(("pageToken".to_string(), token));
                }
                _ => break,
            }
        }

        debug!(path = %path, count = items.len(), "Listed Yandex Cloud resources");
        Ok(items)
    }

    async fn clouds(&self) -> ConnectorResult<Vec<Cloud>> {
        let items = self
            .list_paged(
                YandexService::ResourceManager,
                "resource-manager/v1/clouds",
                "clouds",
                &[],
            )
            .await?;

        items
            .into_iter()
            .map(|item| -> ConnectorResult<Cloud> {
                let cloud: ApiNamed = decode("cloud", item)?;
                Ok(Cloud {
                    name: if cloud.name.is_empty() {
                        cloud.id.clone()
                    } else {
                        cloud.name
                    },
                    id: cloud.id,
                    description: cloud.description,
                })
            })
            .collect()
    }

    async fn folders(&self) -> ConnectorResult<&Vec<Folder>> {
        self.folders
            .get_or_try_init(|| async {
                let mut folders = Vec::new();
                for cloud in self.clouds().await? {
                    let items = self
                        .list_paged(
                            YandexService::ResourceManager,
                            "resource-manager/v1/folders",
                            "folders",
                            &[("cloudId", cloud.id.as_str())],
                        )
                        .await?;
                    for item in items {
                        let folder: ApiNamed = decode("folder", item)?;
                        folders.push(Folder {
                            name: if folder.name.is_empty() {
                                folder.id.clone()
                            } else {
                                folder.name
                            },
                            id: folder.id,
                            cloud_id: cloud.id.clone(),
                            cloud_name: cloud.name.clone(),
                            description: folder.description,
                        });
                    }
                }
                info!(folders = folders.len(), "Fetched Yandex Cloud folders");
                Ok::<_, ConnectorError>(folders)
            })
            .await
    }

    async fn network_names(&self, folder: &Folder) -> HashMap<String, String> {
        let items = match self
            .list_paged(
                YandexService::Vpc,
                "vpc/v1/networks",
                "networks",
                &[("folderId", folder.id.as_str())],
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(folder = %folder.name, error = %e, "Failed to list networks, subnets keep network IDs");
                return HashMap::new();
            }
        };

        items
            .into_iter()
            .filter_map(|item| decode::<ApiNamed>("network", item).ok())
            .map(|network| (network.id, network.name))
            .collect()
    }

    async fn disk(&self, disk_id: &str) -> ConnectorResult<ApiDisk> {
        let url = self
            .config
            .url(YandexService::Compute, &format!("compute/v1/disks/{disk_id}"));
        decode("disk", self.transport.get(&url, &[], None).await?)
    }

    async fn image_name(&self, image_id: &str) -> ConnectorResult<Option<String>> {
        let url = self
            .config
            .url(YandexService::Compute, &format!("compute/v1/images/{image_id}"));
        let image: ApiImage = decode("image", self.transport.get(&url, &[], None).await?)?;
        Ok(image.name)
    }

    /// Resolve attached disks and the OS name of the boot disk's image.
    ///
    /// A failed lookup drops only that detail.
    async fn instance_disks(&self, api: &ApiInstance) -> (Vec<InstanceDisk>, Option<String>) {
        let mut disks = Vec::new();
        let mut os = None;

        let boot = api.boot_disk.as_ref().and_then(|d| d.disk_id.as_deref());
        let attached = boot
            .into_iter()
            .chain(api.secondary_disks.iter().filter_map(|d| d.disk_id.as_deref()));

        for disk_id in attached {
            let disk = match self.disk(disk_id).await {
                Ok(disk) => disk,
                Err(e) => {
                    warn!(vm = %api.name, disk = %disk_id, error = %e, "Failed to fetch disk");
                    continue;
                }
            };

            if Some(disk_id) == boot {
                if let Some(image_id) = disk.source_image_id.as_deref() {
                    match self.image_name(image_id).await {
                        Ok(name) => os = name,
                        Err(e) => {
                            debug!(vm = %api.name, image = %image_id, error = %e, "Could not determine OS");
                        }
                    }
                }
            }

            disks.push(InstanceDisk {
                name: disk.name.clone().unwrap_or_else(|| disk.id.clone()),
                size_bytes: parse_size(disk.size.as_deref()),
                id: Some(disk.id),
                kind: DiskKind::Cloud,
            });
        }

        for local in &api.local_disks {
            disks.push(InstanceDisk {
                id: None,
                name: local
                    .device_name
                    .clone()
                    .unwrap_or_else(|| "local".to_string()),
                size_bytes: parse_size(local.size.as_deref()),
                kind: DiskKind::Local,
            });
        }

        (disks, os)
    }
}

#[async_trait]
impl SourceRepository for YandexCloudClient {
    fn display_name(&self) -> &str {
        "Yandex Cloud"
    }

    #[instrument(skip(self))]
    async fn list_zones(&self) -> ConnectorResult<Vec<Zone>> {
        let items = self
            .list_paged(YandexService::Compute, "compute/v1/zones", "zones", &[])
            .await?;
        items
            .into_iter()
            .map(|item| -> ConnectorResult<Zone> {
                Ok(Zone::named(decode::<ApiZone>("zone", item)?.id))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn list_clouds(&self) -> ConnectorResult<Vec<Cloud>> {
        self.clouds().await
    }

    #[instrument(skip(self))]
    async fn list_folders(&self) -> ConnectorResult<Vec<Folder>> {
        Ok(self.folders().await?.clone())
    }

    #[instrument(skip(self))]
    async fn list_subnets(&self) -> ConnectorResult<Vec<Subnet>> {
        let mut subnets = Vec::new();

        for folder in self.folders().await? {
            let networks = self.network_names(folder).await;
            let items = self
                .list_paged(
                    YandexService::Vpc,
                    "vpc/v1/subnets",
                    "subnets",
                    &[("folderId", folder.id.as_str())],
                )
                .await?;

            for item in items {
                let api: ApiSubnet = decode("subnet", item)?;
                subnets.push(Subnet {
                    name: if api.name.is_empty() {
                        api.id.clone()
                    } else {
                        api.name
                    },
                    cidr: api.v4_cidr_blocks.into_iter().next(),
                    network_name: networks.get(&api.network_id).cloned(),
                    network_id: api.network_id,
                    folder_id: folder.id.clone(),
                    zone_id: api.zone_id,
                    description: api.description,
                    id: api.id,
                });
            }
        }

        Ok(subnets)
    }

    #[instrument(skip(self))]
    async fn list_instances(&self) -> ConnectorResult<Vec<Instance>> {
        let mut instances = Vec::new();

        for folder in self.folders().await? {
            let items = self
                .list_paged(
                    YandexService::Compute,
                    "compute/v1/instances",
                    "instances",
                    &[("folderId", folder.id.as_str())],
                )
                .await?;
            info!(folder = %folder.name, count = items.len(), "Fetched instances");

            for item in items {
                let api: ApiInstance = decode("instance", item)?;
                let (disks, os) = self.instance_disks(&api).await;
                let interfaces = api
                    .network_interfaces
                    .iter()
                    .enumerate()
                    .map(|(index, iface)| {
                        let v4 = iface.primary_v4_address.as_ref();
                        InstanceInterface {
                            index: u32::try_from(index).unwrap_or(u32::MAX),
                            subnet_id: iface.subnet_id.clone(),
                            primary_v4_address: v4.and_then(|a| a.address.clone()),
                            one_to_one_nat: v4
                                .and_then(|a| a.one_to_one_nat.as_ref())
                                .and_then(|nat| nat.address.clone()),
                        }
                    })
                    .collect();

                instances.push(Instance {
                    name: if api.name.is_empty() {
                        api.id.clone()
                    } else {
                        api.name
                    },
                    id: api.id,
                    status: api.status,
                    folder_id: folder.id.clone(),
                    cloud_id: folder.cloud_id.clone(),
                    zone_id: api.zone_id,
                    resources: InstanceResources {
                        memory: api.resources.memory,
                        cores: api.resources.cores,
                    },
                    disks,
                    interfaces,
                    os,
                    platform_id: api.platform_id,
                    created_at: api.created_at,
                });
            }
        }

        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_wire_format() {
        let api: ApiInstance = decode(
            "instance",
            json!({
                "id": "fhm1",
                "name": "web-1",
                "status": "RUNNING",
                "zoneId": "ru-central1-a",
                "resources": {"memory": "4294967296", "cores": 2},
                "bootDisk": {"diskId": "epd1"},
                "localDisks": [{"size": "107374182400", "deviceName": "nvme0"}],
                "networkInterfaces": [{
                    "subnetId": "e9b1",
                    "primaryV4Address": {
                        "address": "10.128.0.5",
                        "oneToOneNat": {"address": "84.201.1.10"}
                    }
                }]
            }),
        )
        .unwrap();

        assert_eq!(api.resources.memory.as_deref(), Some("4294967296"));
        assert_eq!(api.resources.cores.as_deref(), Some("2"));
        assert_eq!(api.boot_disk.unwrap().disk_id.as_deref(), Some("epd1"));
        assert_eq!(parse_size(api.local_disks[0].size.as_deref()), 107_374_182_400);
        let v4 = api.network_interfaces[0].primary_v4_address.as_ref().unwrap();
        assert_eq!(v4.address.as_deref(), Some("10.128.0.5"));
        assert_eq!(
            v4.one_to_one_nat.as_ref().and_then(|n| n.address.as_deref()),
            Some("84.201.1.10")
        );
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size(Some("1024")), 1024);
        assert_eq!(parse_size(Some("abc")), 0);
        assert_eq!(parse_size(None), 0);
    }

    #[test]
    fn test_client_requires_token() {
        assert!(YandexCloudClient::new(YandexConfig::new("")).is_err());
        assert!(YandexCloudClient::new(YandexConfig::new("y0_token")).is_ok());
    }
}
