//! Part sizing and object-key conventions for uploads.
//!
//! The part size biases toward roughly a thousand parts so the client can
//! upload with plenty of parallelism, while staying inside the storage
//! service limits: parts of at least 5 MiB (except the last one), at most
//! 10,000 parts per object.

use std::{ops::Range, time::Duration};

use super::upload_service::UploadError;

pub const MIB: u64 = 1024 * 1024;

/// Files below this size must use the single-shot path.
pub const MIN_MULTIPART_SIZE: u64 = 100 * MIB;
pub const MIN_PART_SIZE: u64 = 5 * MIB;
pub const MAX_PART_SIZE: u64 = 100 * MIB;
pub const MAX_PARTS: u64 = 10_000;

/// Part count the calculator aims for before clamping.
pub const TARGET_PARTS: u64 = 1_000;

/// Largest file the multipart path accepts.
pub const MAX_MULTIPART_SIZE: u64 = MAX_PART_SIZE * MAX_PARTS;

/// Lifetime of every presigned URL handed out.
pub const UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Upper bound on concurrently transferred parts.
pub const MAX_CONCURRENT_PARTS: usize = 10;

/// How a file is split into parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartPlan {
    pub file_size: u64,
    pub part_size: u64,
    pub total_parts: u32,
}

impl PartPlan {
    /// Compute the plan for a multipart upload of `file_size` bytes.
    ///
    /// `part_size = clamp(ceil(file_size / 1000), 5 MiB, 100 MiB)` and
    /// `total_parts = ceil(file_size / part_size)`.
    pub fn for_file_size(file_size: u64) -> Result<Self, UploadError> {
        if file_size < MIN_MULTIPART_SIZE {
            return Err(UploadError::TooSmallForMultipart {
                file_size,
                threshold: MIN_MULTIPART_SIZE,
            });
        }
        if file_size > MAX_MULTIPART_SIZE {
            return Err(UploadError::TooLargeForMultipart {
                file_size,
                limit: MAX_MULTIPART_SIZE,
            });
        }

        let part_size = file_size
            .div_ceil(TARGET_PARTS)
            .clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        let total_parts = file_size.div_ceil(part_size);

        Ok(Self {
            file_size,
            part_size,
            total_parts: total_parts as u32,
        })
    }

    /// Byte range `[start, end)` covered by the 1-based `part_number`.
    ///
    /// Returns `None` for part numbers outside `1..=total_parts`.
    pub fn part_range(&self, part_number: u32) -> Option<Range<u64>> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }
        let start = u64::from(part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.file_size);
        Some(start..end)
    }

    /// Number of concurrent transfers per batch.
    pub fn batch_size(&self) -> usize {
        MAX_CONCURRENT_PARTS.min(self.total_parts as usize).max(1)
    }
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Object key for an upload.
///
/// Authenticated uploads land under the user's folder, anonymous ones under
/// `sessions/`: `uploads/{user_id|sessions}/{file_id}/{sanitized name}`.
pub fn object_key(user_id: Option<&str>, file_id: &str, file_name: &str) -> String {
    let owner = user_id.unwrap_or("sessions");
    format!(
        "uploads/{}/{}/{}",
        owner,
        file_id,
        sanitize_file_name(file_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    #[test]
    fn small_multipart_files_use_minimum_part_size() {
        let plan = PartPlan::for_file_size(250 * MIB).unwrap();
        assert_eq!(plan.part_size, 5 * MIB);
        assert_eq!(plan.total_parts, 50);
    }

    #[test]
    fn eight_gib_splits_into_a_thousand_parts() {
        let plan = PartPlan::for_file_size(8 * GIB).unwrap();
        assert_eq!(plan.part_size, 8_589_935);
        assert_eq!(plan.total_parts, 1000);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let err = PartPlan::for_file_size(99 * MIB).unwrap_err();
        assert!(matches!(err, UploadError::TooSmallForMultipart { .. }));
        assert!(PartPlan::for_file_size(MIN_MULTIPART_SIZE - 1).is_err());
        assert!(PartPlan::for_file_size(MIN_MULTIPART_SIZE).is_ok());
    }

    #[test]
    fn above_part_limit_is_rejected() {
        assert!(PartPlan::for_file_size(MAX_MULTIPART_SIZE).is_ok());
        let err = PartPlan::for_file_size(MAX_MULTIPART_SIZE + 1).unwrap_err();
        assert!(matches!(err, UploadError::TooLargeForMultipart { .. }));
    }

    #[test]
    fn plan_invariants_hold_across_sizes() {
        let mut size = MIN_MULTIPART_SIZE;
        while size <= MAX_MULTIPART_SIZE {
            for candidate in [size, size + 1, size + MIB - 1] {
                if candidate > MAX_MULTIPART_SIZE {
                    continue;
                }
                let plan = PartPlan::for_file_size(candidate).unwrap();
                assert!(plan.part_size * u64::from(plan.total_parts) >= candidate);
                assert!((MIN_PART_SIZE..=MAX_PART_SIZE).contains(&plan.part_size));
                assert!(u64::from(plan.total_parts) <= MAX_PARTS);
                // the last part is never empty
                assert!(plan.part_size * u64::from(plan.total_parts - 1) < candidate);
            }
            size = size * 3 / 2;
        }
    }

    #[test]
    fn part_ranges_tile_the_file() {
        let plan = PartPlan::for_file_size(101 * MIB + 7).unwrap();
        let mut next = 0;
        for n in 1..=plan.total_parts {
            let range = plan.part_range(n).unwrap();
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, plan.file_size);
        assert_eq!(plan.part_range(0), None);
        assert_eq!(plan.part_range(plan.total_parts + 1), None);
    }

    #[test]
    fn batch_size_caps_at_ten() {
        let plan = PartPlan::for_file_size(250 * MIB).unwrap();
        assert_eq!(plan.batch_size(), 10);
        let plan = PartPlan {
            file_size: 3,
            part_size: 1,
            total_parts: 3,
        };
        assert_eq!(plan.batch_size(), 3);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("my clip (1).mp4"), "my_clip__1_.mp4");
        assert_eq!(sanitize_file_name("a-b.c_d"), "a-b.c_d");
        assert_eq!(sanitize_file_name("vidéo.mov"), "vid_o.mov");
    }

    #[test]
    fn keys_follow_owner_convention() {
        assert_eq!(
            object_key(Some("u-1"), "f-1", "clip one.mp4"),
            "uploads/u-1/f-1/clip_one.mp4"
        );
        assert_eq!(
            object_key(None, "f-1", "clip.mp4"),
            "uploads/sessions/f-1/clip.mp4"
        );
    }
}
