use crate::types::CaptionFrame;

/// Measures rendered text so captions can be wrapped before ffmpeg draws them.
pub trait TextMeasure {
    fn width(&self, text: &str) -> u32;
    fn line_height(&self) -> u32;
}

/// Width estimate from the font size and coarse per-glyph advance classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproxMetrics {
    pub font_size: u32,
}

impl ApproxMetrics {
    pub fn new(font_size: u32) -> Self {
        Self { font_size }
    }

    fn advance(c: char) -> f64 {
        match c {
            ' ' => 0.28,
            'i' | 'j' | 'l' | 'í' | 'I' | '.' | ',' | ';' | ':' | '!' | '¡' | '\'' | '|' => 0.30,
            'm' | 'w' | 'M' | 'W' => 0.85,
            c if c.is_uppercase() => 0.68,
            c if c.is_ascii_digit() => 0.56,
            _ => 0.52,
        }
    }
}

impl TextMeasure for ApproxMetrics {
    fn width(&self, text: &str) -> u32 {
        let em: f64 = text.chars().map(Self::advance).sum();
        (em * self.font_size as f64).ceil() as u32
    }

    fn line_height(&self) -> u32 {
        (self.font_size as f64 * 1.25).ceil() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptionPlacement {
    Center,
    /// Block centered on `ratio * frame_height`.
    Anchor(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub max_width: u32,
    pub margin: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub placement: CaptionPlacement,
}

impl Default for CaptionLayout {
    fn default() -> Self {
        Self {
            max_width: 800,
            margin: 20,
            frame_width: 1280,
            frame_height: 720,
            placement: CaptionPlacement::Center,
        }
    }
}

impl CaptionLayout {
    /// Layout used over stock footage: lower third.
    pub fn lower_third(self) -> Self {
        Self {
            placement: CaptionPlacement::Anchor(0.85),
            ..self
        }
    }

    /// Width lines wrap to, never wider than the frame allows.
    pub fn wrap_width(&self) -> u32 {
        self.max_width
            .min(self.frame_width.saturating_sub(self.margin))
    }
}

/// Greedy word wrap. A single word wider than the limit gets its own line.
pub fn wrap_caption(
    text: &str,
    max_width: u32,
    margin: u32,
    measure: &dyn TextMeasure,
) -> Vec<String> {
    let limit = max_width.saturating_sub(margin);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate = format!("{current} {word}");
        if measure.width(&candidate) > limit {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn layout_caption(
    text: &str,
    layout: &CaptionLayout,
    measure: &dyn TextMeasure,
    font_size: u32,
    boxed: bool,
) -> CaptionFrame {
    let lines = wrap_caption(text, layout.wrap_width(), layout.margin, measure);
    let line_height = measure.line_height();
    let block = line_height * lines.len() as u32;

    let top_y = match layout.placement {
        CaptionPlacement::Center => layout.frame_height.saturating_sub(block) / 2,
        CaptionPlacement::Anchor(ratio) => {
            let anchor = (layout.frame_height as f64 * ratio).round() as u32;
            anchor
                .saturating_sub(block / 2)
                .min(layout.frame_height.saturating_sub(block))
        }
    };

    CaptionFrame {
        lines,
        font_size,
        line_height,
        top_y,
        boxed,
    }
}
