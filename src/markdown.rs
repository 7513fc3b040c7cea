//! Minimal markdown-to-HTML rendering for generated advice.

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace `**x**` with `<strong>` and then `*x*` with `<em>`. Unpaired
/// markers are left as written.
fn render_inline(text: &str) -> String {
    let bold = wrap_pairs(text, "**", "strong");
    wrap_pairs(&bold, "*", "em")
}

fn wrap_pairs(text: &str, marker: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(marker) {
        let after = &rest[start + marker.len()..];
        match after.find(marker) {
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                out.push_str(&format!("<{tag}>{}</{tag}>", &after[..end]));
                rest = &after[end + marker.len()..];
            }
            _ => break,
        }
    }
    out.push_str(rest);
    out
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    None,
    Paragraph,
    Bullets,
    Numbered,
}

fn close(out: &mut String, block: Block) {
    match block {
        Block::Paragraph => out.push_str("</p>\n"),
        Block::Bullets => out.push_str("</ul>\n"),
        Block::Numbered => out.push_str("</ol>\n"),
        Block::None => {}
    }
}

fn numbered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ")
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=3).contains(&level) {
        return None;
    }
    line[level..].strip_prefix(' ').map(|text| (level, text))
}

pub fn to_html(text: &str) -> String {
    let escaped = escape_html(text);
    let mut out = String::new();
    let mut block = Block::None;

    for raw in escaped.lines() {
        let line = raw.trim();
        if line.is_empty() {
            close(&mut out, block);
            block = Block::None;
            continue;
        }

        if let Some((level, text)) = heading(line) {
            close(&mut out, block);
            block = Block::None;
            out.push_str(&format!("<h{level}>{}</h{level}>\n", render_inline(text.trim())));
            continue;
        }

        let (kind, item) = if let Some(item) = line
            .strip_prefix("* ")
            .or_else(|| line.strip_prefix("- "))
        {
            (Block::Bullets, item)
        } else if let Some(item) = numbered_item(line) {
            (Block::Numbered, item)
        } else {
            (Block::Paragraph, line)
        };

        if kind != block {
            close(&mut out, block);
            match kind {
                Block::Bullets => out.push_str("<ul>\n"),
                Block::Numbered => out.push_str("<ol>\n"),
                Block::Paragraph => out.push_str("<p>"),
                Block::None => {}
            }
            block = kind;
        } else if kind == Block::Paragraph {
            out.push_str("<br>");
        }

        match kind {
            Block::Paragraph => out.push_str(&render_inline(item)),
            _ => out.push_str(&format!("<li>{}</li>\n", render_inline(item.trim()))),
        }
    }
    close(&mut out, block);
    out
}
