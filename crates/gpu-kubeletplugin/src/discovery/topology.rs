//! KFD topology scanning.
//!
//! Every compute node under `/sys/class/kfd/kfd/topology/nodes/<N>` exposes a
//! `properties` file of `<key> <value>` lines. GPU nodes carry a non-zero
//! `drm_render_minor` that ties them to a `renderD<N>` DRM node, and a
//! `unique_id` shared by all partitions of the same physical device.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Identity and capacity facts for one render device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyRecord {
    /// Render minor, e.g. 128 for `renderD128`
    pub render_id: u32,
    /// Vendor unique id, shared with partitions of the same device
    pub unique_id: String,
    /// KFD node index
    pub node_id: u32,
    pub simd_count: u32,
    /// Never zero
    pub simd_per_cu: u32,
    pub cu_count: u32,
    /// Zero when the memory bank could not be read
    pub vram_bytes: u64,
}

impl TopologyRecord {
    pub fn has_vram(&self) -> bool {
        self.vram_bytes > 0
    }
}

/// Parsed contents of a topology `properties` file
#[derive(Debug, Default, Clone)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Parse `<key> <value>` lines; the first occurrence of a key wins and
    /// lines that do not split into a key and a value are ignored.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            values
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { values }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        fs::read_to_string(path).map(|content| Self::parse(&content))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Integer value of `key`, accepting decimal and `0x`-prefixed hex
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let raw = self.get_str(key)?;
        match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        }
    }
}

/// Reads the KFD topology tree into per-render-device records
#[derive(Debug, Clone)]
pub struct TopologyScanner {
    nodes_dir: PathBuf,
}

impl TopologyScanner {
    pub fn new<P: Into<PathBuf>>(nodes_dir: P) -> Self {
        Self {
            nodes_dir: nodes_dir.into(),
        }
    }

    /// Scan all topology nodes.
    ///
    /// Malformed nodes are logged and skipped; the scan itself never fails.
    #[tracing::instrument(level = "debug", skip(self), fields(nodes_dir = %self.nodes_dir.display()))]
    pub fn scan(&self) -> BTreeMap<u32, TopologyRecord> {
        let mut records = BTreeMap::new();

        let entries = match fs::read_dir(&self.nodes_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Failed to read topology nodes at {}: {}",
                    self.nodes_dir.display(),
                    e
                );
                return records;
            }
        };

        let mut node_dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join("properties").is_file())
            .collect();
        node_dirs.sort();

        for node_dir in node_dirs {
            if let Some(record) = self.scan_node(&node_dir) {
                if let Some(previous) = records.insert(record.render_id, record) {
                    warn!(
                        render_id = previous.render_id,
                        node_id = previous.node_id,
                        "Duplicate drm_render_minor in topology, keeping the later node"
                    );
                }
            }
        }

        info!("Found {} GPU topology nodes", records.len());
        records
    }

    fn scan_node(&self, node_dir: &Path) -> Option<TopologyRecord> {
        let properties_path = node_dir.join("properties");
        debug!("Parsing {}", properties_path.display());

        let node_name = node_dir.file_name()?.to_string_lossy().into_owned();
        let node_id: u32 = match node_name.parse() {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to parse topology node index {}: {}", node_name, e);
                return None;
            }
        };

        let properties = match Properties::read(&properties_path) {
            Ok(properties) => properties,
            Err(e) => {
                error!("Failed to read {}: {}", properties_path.display(), e);
                return None;
            }
        };

        let Some(render_minor) = properties.get_u64("drm_render_minor") else {
            error!(
                "Topology property drm_render_minor not found in {}",
                properties_path.display()
            );
            return None;
        };
        if render_minor == 0 {
            debug!(node_id, "Skipping topology node without a render device");
            return None;
        }
        let Ok(render_id) = u32::try_from(render_minor) else {
            error!(node_id, render_minor, "drm_render_minor out of range");
            return None;
        };

        let Some(unique_id) = properties.get_str("unique_id") else {
            error!(
                "Topology property unique_id not found in {}",
                properties_path.display()
            );
            return None;
        };

        let simd_count = match properties.get_u64("simd_count").map(u32::try_from) {
            Some(Ok(v)) => v,
            Some(Err(_)) => {
                error!(
                    "simd_count out of range in {}",
                    properties_path.display()
                );
                return None;
            }
            None => {
                warn!(
                    "Failed to parse simd_count from {}, using 0",
                    properties_path.display()
                );
                0
            }
        };

        let simd_per_cu = match properties.get_u64("simd_per_cu").map(u32::try_from) {
            Some(Ok(v)) if v > 0 => v,
            Some(Err(_)) => {
                error!(
                    "simd_per_cu out of range in {}",
                    properties_path.display()
                );
                return None;
            }
            _ => {
                warn!(
                    "simd_per_cu missing or zero in {}, using 1",
                    properties_path.display()
                );
                1
            }
        };

        let vram_bytes = read_vram_bytes(node_dir);
        if vram_bytes > 0 {
            info!(
                "Found VRAM size: {} bytes for renderD{}",
                vram_bytes, render_id
            );
        }

        Some(TopologyRecord {
            render_id,
            unique_id: unique_id.to_string(),
            node_id,
            simd_count,
            simd_per_cu,
            cu_count: simd_count / simd_per_cu,
            vram_bytes,
        })
    }
}

fn read_vram_bytes(node_dir: &Path) -> u64 {
    let path = node_dir.join("mem_banks/0/properties");
    match Properties::read(&path) {
        Ok(properties) => properties.get_u64("size_in_bytes").unwrap_or_else(|| {
            warn!("size_in_bytes not found in {}", path.display());
            0
        }),
        Err(e) => {
            warn!("Failed to parse VRAM size from {}: {}", path.display(), e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::discovery::fixture::SysfsFixture;

    #[test]
    fn test_properties_first_match_wins() {
        let props = Properties::parse(
            "cpu_cores_count 0\nsimd_count 304\nsimd_count 12\ngarbage\n\nunique_id 0x1f\n",
        );
        assert_eq!(props.get_u64("simd_count"), Some(304));
        assert_eq!(props.get_u64("cpu_cores_count"), Some(0));
        assert_eq!(props.get_u64("unique_id"), Some(31));
        assert_eq!(props.get_str("garbage"), None);
    }

    #[test]
    fn test_scan_gpu_node() {
        let fixture = SysfsFixture::new();
        fixture.topology_node(0, "cpu_cores_count 64\ndrm_render_minor 0\n", None);
        fixture.topology_node(
            2,
            "simd_count 304\nsimd_per_cu 4\ndrm_render_minor 128\nunique_id 9418497713152471811\n",
            Some(206_141_652_992),
        );

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[&128],
            TopologyRecord {
                render_id: 128,
                unique_id: "9418497713152471811".to_string(),
                node_id: 2,
                simd_count: 304,
                simd_per_cu: 4,
                cu_count: 76,
                vram_bytes: 206_141_652_992,
            }
        );
    }

    #[test]
    fn test_zero_or_missing_simd_per_cu_uses_divisor_one() {
        let fixture = SysfsFixture::new();
        fixture.topology_node(
            1,
            "simd_count 40\nsimd_per_cu 0\ndrm_render_minor 128\nunique_id 11\n",
            None,
        );
        fixture.topology_node(2, "simd_count 24\ndrm_render_minor 129\nunique_id 12\n", None);

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();

        assert_eq!(records[&128].simd_per_cu, 1);
        assert_eq!(records[&128].cu_count, 40);
        assert_eq!(records[&129].simd_per_cu, 1);
        assert_eq!(records[&129].cu_count, 24);
    }

    #[test]
    fn test_out_of_range_simd_fields_skip_the_node() {
        let fixture = SysfsFixture::new();
        fixture.topology_node(
            1,
            "simd_count 40\nsimd_per_cu 4294967296\ndrm_render_minor 128\nunique_id 11\n",
            None,
        );
        fixture.topology_node(
            2,
            "simd_count 4294967297\nsimd_per_cu 4\ndrm_render_minor 129\nunique_id 12\n",
            None,
        );
        fixture.topology_node(
            3,
            "simd_count 8\nsimd_per_cu 2\ndrm_render_minor 130\nunique_id 13\n",
            Some(u64::MAX),
        );

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();

        assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![130]);
        assert_eq!(records[&130].cu_count, 4);
        assert_eq!(records[&130].vram_bytes, u64::MAX);
    }

    #[test]
    fn test_optional_fields_default() {
        let fixture = SysfsFixture::new();
        fixture.topology_node(1, "drm_render_minor 130\nunique_id 42\n", None);

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();

        let record = &records[&130];
        assert_eq!(record.simd_count, 0);
        assert_eq!(record.cu_count, 0);
        assert_eq!(record.vram_bytes, 0);
        assert!(!record.has_vram());
    }

    #[test]
    fn test_nodes_missing_mandatory_fields_are_skipped() {
        let fixture = SysfsFixture::new();
        fixture.topology_node(1, "simd_count 304\nunique_id 42\n", None);
        fixture.topology_node(2, "simd_count 304\ndrm_render_minor 129\n", None);
        fixture.topology_node(3, "drm_render_minor 130\nunique_id 43\n", None);

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();

        assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![130]);
    }

    #[test]
    fn test_non_numeric_node_directory_is_skipped() {
        let fixture = SysfsFixture::new();
        let dir = fixture.layout().topology_nodes_dir().join("bogus");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("properties"), "drm_render_minor 128\nunique_id 1\n").unwrap();

        let records = TopologyScanner::new(fixture.layout().topology_nodes_dir()).scan();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_topology_tree_yields_empty_map() {
        let dir = TempDir::new().unwrap();
        let records = TopologyScanner::new(dir.path().join("does/not/exist")).scan();
        assert!(records.is_empty());
    }
}
