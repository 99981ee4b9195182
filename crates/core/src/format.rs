use crate::types::Manifest;

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

/// One line per segment: `[MM:SS–MM:SS] caption`
pub fn format_manifest_readable(manifest: &Manifest) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{} segments, {} total, voice {}\n\n",
        manifest.segments.len(),
        format_timestamp(manifest.duration_seconds),
        manifest.voice
    ));

    for entry in &manifest.segments {
        let start = format_timestamp(entry.start_seconds);
        let end = format_timestamp(entry.start_seconds + entry.duration_seconds);
        let text = if entry.text.is_empty() {
            "(pause)"
        } else {
            entry.text.trim()
        };
        output.push_str(&format!("[{}–{}] {}\n", start, end, text));
    }

    output
}
