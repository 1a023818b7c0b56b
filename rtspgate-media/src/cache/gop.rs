use {crate::frame::EgressFrame, std::collections::VecDeque, std::sync::Arc};

/// Max frames per GOP to prevent unbounded memory growth.
const MAX_FRAMES_PER_GOP: usize = 1500;

/// A single Group of Pictures.
///
/// Frames accumulate in `pending` while the GOP is open and are frozen into
/// the shared `Arc` when it closes or is read, so handing cached GOPs to a
/// new subscriber only bumps a reference count.
#[derive(Clone, Default)]
pub struct Gop {
    frozen: Arc<Vec<EgressFrame>>,
    pending: Vec<EgressFrame>,
    overflowed: bool,
}

impl Gop {
    fn save_frame(&mut self, frame: EgressFrame) {
        if self.len() >= MAX_FRAMES_PER_GOP {
            if !self.overflowed {
                self.overflowed = true;
                tracing::warn!(
                    "GOP reached {MAX_FRAMES_PER_GOP} frames, dropping until next keyframe"
                );
            }
            return;
        }
        self.pending.push(frame);
    }

    fn freeze(&mut self) {
        if !self.pending.is_empty() {
            let mut all_frames = Vec::with_capacity(self.len());
            all_frames.extend_from_slice(&self.frozen);
            all_frames.append(&mut self.pending);
            self.frozen = Arc::new(all_frames);
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[EgressFrame] {
        &self.frozen
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frozen.len() + self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The last `size` GOPs of a path. Frames before the first keyframe are
/// never cached, so a replay always starts decodable.
#[derive(Clone)]
pub struct Gops {
    gops: VecDeque<Gop>,
    size: usize,
}

impl Default for Gops {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Gops {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            gops: VecDeque::new(),
            size,
        }
    }

    pub fn save_frame(&mut self, frame: EgressFrame) {
        if self.size == 0 {
            return;
        }

        if frame.is_key_frame() {
            if let Some(back) = self.gops.back_mut() {
                back.freeze();
            }
            if self.gops.len() == self.size {
                self.gops.pop_front();
            }
            self.gops.push_back(Gop::default());
        }

        if let Some(gop) = self.gops.back_mut() {
            gop.save_frame(frame);
        }
    }

    /// Snapshot of the cached GOPs, oldest first.
    #[must_use]
    pub fn get_gops(&mut self) -> Vec<Gop> {
        if let Some(back) = self.gops.back_mut() {
            back.freeze();
        }
        self.gops.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.gops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(timestamp: u32, key_frame: bool) -> EgressFrame {
        EgressFrame::Video {
            timestamp,
            key_frame,
            nalus: vec![Bytes::from_static(&[0x65])],
        }
    }

    #[test]
    fn test_frames_before_first_keyframe_are_skipped() {
        let mut gops = Gops::new(1);
        gops.save_frame(video(0, false));
        assert!(gops.get_gops().is_empty());

        gops.save_frame(video(3000, true));
        gops.save_frame(video(6000, false));
        let cached = gops.get_gops();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].frames().len(), 2);
        assert!(cached[0].frames()[0].is_key_frame());
    }

    #[test]
    fn test_keeps_only_configured_number_of_gops() {
        let mut gops = Gops::new(2);
        for i in 0..5 {
            gops.save_frame(video(i * 3000, true));
            gops.save_frame(video(i * 3000 + 1500, false));
        }
        let cached = gops.get_gops();
        assert_eq!(cached.len(), 2);
        assert_eq!(
            cached[0].frames()[0],
            video(9000, true),
            "oldest retained GOP starts at the fourth keyframe"
        );
    }

    #[test]
    fn test_snapshot_is_independent_of_later_frames() {
        let mut gops = Gops::new(1);
        gops.save_frame(video(0, true));
        let snapshot = gops.get_gops();
        gops.save_frame(video(3000, false));
        assert_eq!(snapshot[0].frames().len(), 1);
        assert_eq!(gops.get_gops()[0].frames().len(), 2);
    }

    #[test]
    fn test_disabled_cache() {
        let mut gops = Gops::new(0);
        gops.save_frame(video(0, true));
        assert!(gops.get_gops().is_empty());
    }
}
