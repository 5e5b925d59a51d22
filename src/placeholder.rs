//! Placeholder banner
//!
//! A self-contained SVG banner returned as a `data:` URI. Used whenever no
//! generated image is available, so a creative always has something to show.

use crate::config::PlaceholderConfig;

const DATA_URI_PREFIX: &str = "data:image/svg+xml;charset=UTF-8,";
const FONT_STACK: &str = "Inter, system-ui, -apple-system, Segoe UI, Roboto, Ubuntu";

/// Render a gradient banner with a bold title and optional subtitle.
///
/// Text is XML-escaped and the document is percent-encoded, so the result can
/// be dropped straight into an `src` attribute.
pub fn generate_placeholder_banner(
    title: &str,
    subtitle: Option<&str>,
    style: &PlaceholderConfig,
) -> String {
    let subtitle = subtitle
        .filter(|s| !s.is_empty())
        .map(|s| {
            format!(
                "<text x='60' y='430' font-size='34' opacity='0.9'>{}</text>",
                escape_xml(s)
            )
        })
        .unwrap_or_default();

    let svg = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns='http://www.w3.org/2000/svg' width='{width}' height='{height}'>
  <defs>
    <linearGradient id='g' x1='0' y1='0' x2='1' y2='1'>
      <stop offset='0%' stop-color='{start}'/>
      <stop offset='100%' stop-color='{end}'/>
    </linearGradient>
    <filter id='noise'>
      <feTurbulence type='fractalNoise' baseFrequency='0.8' numOctaves='2' stitchTiles='stitch' />
      <feColorMatrix type='saturate' values='0' />
      <feComponentTransfer>
        <feFuncA type='linear' slope='0.06'/>
      </feComponentTransfer>
      <feBlend mode='overlay' />
    </filter>
  </defs>
  <rect width='100%' height='100%' fill='url(#g)'/>
  <rect width='100%' height='100%' filter='url(#noise)' opacity='0.6'/>
  <g font-family='{fonts}' fill='{foreground}'>
    <text x='60' y='360' font-size='72' font-weight='800'>{title}</text>
    {subtitle}
  </g>
</svg>"#,
        width = style.width,
        height = style.height,
        start = escape_xml(&style.gradient_start),
        end = escape_xml(&style.gradient_end),
        fonts = FONT_STACK,
        foreground = escape_xml(&style.foreground),
        title = escape_xml(title),
        subtitle = subtitle,
    );

    format!("{}{}", DATA_URI_PREFIX, urlencoding::encode(&svg))
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
