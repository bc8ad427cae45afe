//! Object key layout in blob storage.
//!
//! ```text
//! {job_id}/block_{n}/{frame file}   frames, n = block index + 1
//! {job_id}/{job_id}.zip             archive
//! ```

use crate::job::JobId;

/// Prefix under which every object of a job lives.
pub fn job_prefix(job_id: &JobId) -> String {
    format!("{}/", job_id)
}

/// Prefix for the frames of one block (no trailing slash).
pub fn block_prefix(job_id: &JobId, block_index: u32) -> String {
    format!("{}/block_{}", job_id, block_index + 1)
}

/// Key of a single frame file.
pub fn frame_key(job_id: &JobId, block_index: u32, file_name: &str) -> String {
    format!("{}/{}", block_prefix(job_id, block_index), file_name)
}

/// File name of the archive.
pub fn zip_file_name(job_id: &JobId) -> String {
    format!("{}.zip", job_id)
}

/// Key of the archive.
pub fn zip_key(job_id: &JobId) -> String {
    format!("{}/{}", job_id, zip_file_name(job_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = JobId::from("vid");
        assert_eq!(job_prefix(&id), "vid/");
        assert_eq!(block_prefix(&id, 0), "vid/block_1");
        assert_eq!(frame_key(&id, 2, "block0002_frame0001.jpg"), "vid/block_3/block0002_frame0001.jpg");
        assert_eq!(zip_key(&id), "vid/vid.zip");
    }

    #[test]
    fn test_frame_keys_share_job_prefix() {
        let id = JobId::from("vid");
        assert!(frame_key(&id, 7, "f.jpg").starts_with(&job_prefix(&id)));
        assert!(zip_key(&id).starts_with(&job_prefix(&id)));
    }
}
