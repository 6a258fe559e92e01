use common::geometry::BoundingBox;
use image::RgbImage;

/// Shots retained per vehicle
pub const LEDGER_CAPACITY: usize = 5;

/// A plate crop captured from one frame
#[derive(Debug, Clone)]
pub struct Shot {
    pub image: RgbImage,
    /// Plate detector confidence
    pub confidence: f32,
    pub frame_number: u64,
    pub plate_box: BoundingBox,
}

impl Shot {
    pub fn is_degenerate(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// Top shots of a vehicle, confidence-descending.
///
/// Ties keep admission order, so an earlier shot outranks a later shot of
/// equal confidence.
#[derive(Debug, Clone, Default)]
pub struct BestShotLedger {
    shots: Vec<Shot>,
}

impl BestShotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a shot; the lowest ranked shot is evicted past capacity.
    pub fn admit(&mut self, shot: Shot) {
        self.shots.push(shot);
        // Vec::sort_by is stable
        self.shots.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        self.shots.truncate(LEDGER_CAPACITY);
    }

    pub fn top(&self) -> Option<&Shot> {
        self.shots.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shot> {
        self.shots.iter()
    }

    pub fn len(&self) -> usize {
        self.shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(confidence: f32, frame_number: u64) -> Shot {
        Shot {
            image: RgbImage::new(4, 2),
            confidence,
            frame_number,
            plate_box: BoundingBox::new(0, 0, 4, 2),
        }
    }

    fn confidences(ledger: &BestShotLedger) -> Vec<f32> {
        ledger.iter().map(|s| s.confidence).collect()
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = BestShotLedger::new();
        assert!(ledger.is_empty());
        assert!(ledger.top().is_none());
    }

    #[test]
    fn test_keeps_top_five_descending() {
        let mut ledger = BestShotLedger::new();
        for (i, c) in [0.1, 0.9, 0.3, 0.7, 0.5, 0.8, 0.2].into_iter().enumerate() {
            ledger.admit(shot(c, i as u64));
        }

        assert_eq!(ledger.len(), 5);
        assert_eq!(confidences(&ledger), vec![0.9, 0.8, 0.7, 0.5, 0.3]);
        assert_eq!(ledger.top().unwrap().frame_number, 1);
    }

    #[test]
    fn test_ties_keep_admission_order() {
        let mut ledger = BestShotLedger::new();
        ledger.admit(shot(0.6, 0));
        ledger.admit(shot(0.6, 1));
        ledger.admit(shot(0.9, 2));
        ledger.admit(shot(0.6, 3));

        let frames: Vec<u64> = ledger.iter().map(|s| s.frame_number).collect();
        assert_eq!(frames, vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_low_shot_rejected_when_full() {
        let mut ledger = BestShotLedger::new();
        for i in 0..5 {
            ledger.admit(shot(0.5, i));
        }
        ledger.admit(shot(0.5, 5));
        ledger.admit(shot(0.1, 6));

        let frames: Vec<u64> = ledger.iter().map(|s| s.frame_number).collect();
        assert_eq!(frames, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_degenerate_shot() {
        let mut s = shot(0.5, 0);
        assert!(!s.is_degenerate());
        s.image = RgbImage::new(0, 10);
        assert!(s.is_degenerate());
    }
}
