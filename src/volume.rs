use std::path::{Path, PathBuf};

use crate::error::VolumeError;

/// Reports readiness and free space of a volume.
///
/// Implementations must never panic on a missing or unmounted volume; they
/// return a [`VolumeError`] instead.
pub trait VolumeInspector: Send + Sync {
    /// Bytes available to unprivileged writers on `volume_id`.
    fn free_space_bytes(&self, volume_id: &str) -> Result<u64, VolumeError>;

    fn is_ready(&self, volume_id: &str) -> bool {
        self.free_space_bytes(volume_id).is_ok()
    }
}

/// Space accounting for one volume.
#[derive(Debug, Clone)]
pub struct VolumeSpace {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

impl VolumeSpace {
    fn new(total: u64, available: u64) -> Self {
        Self {
            total,
            available,
            used: total.saturating_sub(available),
        }
    }

    pub fn usage_percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f32 / self.total as f32
    }
}

/// Queries the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumes;

impl SystemVolumes {
    pub fn space(&self, volume_id: &str) -> Result<VolumeSpace, VolumeError> {
        if !Path::new(volume_id).exists() {
            return Err(VolumeError::NotFound(volume_id.to_string()));
        }
        query_space(volume_id)
    }
}

impl VolumeInspector for SystemVolumes {
    fn free_space_bytes(&self, volume_id: &str) -> Result<u64, VolumeError> {
        self.space(volume_id).map(|s| s.available)
    }
}

#[cfg(unix)]
fn query_space(volume_id: &str) -> Result<VolumeSpace, VolumeError> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let path = CString::new(volume_id).map_err(|_| VolumeError::NotFound(volume_id.to_string()))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let ret = unsafe { libc::statvfs(path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(VolumeError::NotReady(
            volume_id.to_string(),
            std::io::Error::last_os_error(),
        ));
    }
    let stat = unsafe { stat.assume_init() };
    let block_size = stat.f_frsize as u64;
    Ok(VolumeSpace::new(
        stat.f_blocks as u64 * block_size,
        stat.f_bavail as u64 * block_size,
    ))
}

#[cfg(not(unix))]
fn query_space(volume_id: &str) -> Result<VolumeSpace, VolumeError> {
    let wanted = volume_id.trim_end_matches(['\\', '/']);
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|d| {
            d.mount_point()
                .to_string_lossy()
                .trim_end_matches(['\\', '/'])
                .eq_ignore_ascii_case(wanted)
        })
        .map(|d| VolumeSpace::new(d.total_space(), d.available_space()))
        .ok_or_else(|| {
            VolumeError::NotReady(
                volume_id.to_string(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no mounted disk"),
            )
        })
}

/// A mounted, non-removable volume.
#[derive(Debug, Clone)]
pub struct VolumeSummary {
    pub name: String,
    pub mount_point: PathBuf,
    pub space: VolumeSpace,
}

/// List fixed volumes with their current space.
pub fn list_volumes() -> Vec<VolumeSummary> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut volumes: Vec<VolumeSummary> = disks
        .list()
        .iter()
        .filter(|d| !d.is_removable() && d.total_space() > 0)
        .map(|d| VolumeSummary {
            name: d.name().to_string_lossy().to_string(),
            mount_point: d.mount_point().to_path_buf(),
            space: VolumeSpace::new(d.total_space(), d.available_space()),
        })
        .collect();
    volumes.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    volumes
}
