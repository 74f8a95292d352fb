//! Accumulation window of IMU samples between the last keyframe and the
//! current frame.
//!
//! Each synchronized packet carries the samples since the previous frame,
//! closed by a sample interpolated at the frame timestamp. When windows are
//! concatenated, that final interpolated sample is not a genuine measurement
//! and must be dropped before appending the next window, so the buffer holds
//! every real sample exactly once plus one interpolated upper bound.

use crate::imu::ImuSample;
use crate::types::Timestamp;

/// Window of inertial samples spanning [last keyframe, current frame].
///
/// Cleared at every keyframe boundary; grown by concatenation otherwise.
#[derive(Debug, Default)]
pub struct ImuAccumulationBuffer {
    stamps: Vec<Timestamp>,
    samples: Vec<ImuSample>,
}

impl ImuAccumulationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one packet's window.
    ///
    /// The first append after a reset stores the window verbatim; later
    /// appends drop the buffer's trailing interpolated sample first.
    /// Panics on stamp/sample count mismatch, an empty incoming window, or
    /// non-monotone timestamps: these signal upstream data corruption.
    pub fn append(&mut self, stamps: &[Timestamp], samples: &[ImuSample]) {
        assert_eq!(
            stamps.len(),
            samples.len(),
            "imu window: {} stamps but {} samples",
            stamps.len(),
            samples.len()
        );
        assert!(!stamps.is_empty(), "imu window: empty packet window");

        if self.stamps.is_empty() {
            self.stamps.extend_from_slice(stamps);
            self.samples.extend_from_slice(samples);
        } else {
            // The trailing sample is the interpolated frame-boundary value,
            // not a real measurement.
            self.stamps.pop();
            self.samples.pop();
            self.stamps.extend_from_slice(stamps);
            self.samples.extend_from_slice(samples);
        }

        assert!(
            self.stamps.windows(2).all(|w| w[0] < w[1]),
            "imu window: timestamps not strictly increasing after append"
        );
    }

    /// Reset at a keyframe boundary.
    pub fn clear(&mut self) {
        self.stamps.clear();
        self.samples.clear();
    }

    pub fn stamps(&self) -> &[Timestamp] {
        &self.stamps
    }

    pub fn samples(&self) -> &[ImuSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
