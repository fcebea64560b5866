pub const DEFAULT_SPLIT: f64 = 50.0;
const FINE_STEP: f64 = 1.0;
const COARSE_STEP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliderKey {
    Left,
    Right,
    PageDown,
    PageUp,
    Home,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonSlider {
    position: f64,
}

impl Default for ComparisonSlider {
    fn default() -> Self {
        Self {
            position: DEFAULT_SPLIT,
        }
    }
}

impl ComparisonSlider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn set(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.position = value.clamp(0.0, 100.0);
    }

    pub fn reset(&mut self) {
        self.position = DEFAULT_SPLIT;
    }

    pub fn drag_to(&mut self, pointer_x: f64, track_left: f64, track_width: f64) {
        if track_width.is_nan()
            || track_width <= 0.0
            || !pointer_x.is_finite()
            || !track_left.is_finite()
        {
            return;
        }
        self.set((pointer_x - track_left) / track_width * 100.0);
    }

    pub fn key(&mut self, key: SliderKey) {
        let next = match key {
            SliderKey::Left => self.position - FINE_STEP,
            SliderKey::Right => self.position + FINE_STEP,
            SliderKey::PageDown => self.position - COARSE_STEP,
            SliderKey::PageUp => self.position + COARSE_STEP,
            SliderKey::Home => 0.0,
            SliderKey::End => 100.0,
        };
        self.set(next);
    }

    pub fn clip_inset(&self) -> f64 {
        100.0 - self.position
    }
}
