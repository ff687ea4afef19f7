/// Terminal styling helpers
///
/// ANSI SGR via `colored` plus Unicode box-drawing tables. Both transports
/// receive the same byte stream, so everything here is plain strings.

use colored::Colorize;

/// CRLF — SSH channels want both; the web terminal tolerates them.
pub const NEWLINE: &str = "\r\n";

pub fn prompt(username: &str, server_path: Option<&str>) -> String {
    match server_path {
        Some(path) => format!(
            "{}@{}$ ",
            username.bright_green().bold(),
            path.bright_red()
        ),
        None => format!("{}@{}$ ", username.bright_green().bold(), "".normal()),
    }
}

pub fn error_line(message: &str) -> String {
    format!("{} {}{}", "✗".bright_red().bold(), message.bright_red(), NEWLINE)
}

pub fn ok_line(message: &str) -> String {
    format!("{} {}{}", "✓".bright_green().bold(), message, NEWLINE)
}

pub fn info_line(message: &str) -> String {
    format!("{}{}", message.bright_black(), NEWLINE)
}

pub fn heading(text: &str) -> String {
    format!("{}{}", text.bright_cyan().bold(), NEWLINE)
}

pub fn chat_line(username: &str, content: &str) -> String {
    if username == "system" {
        format!("{} {}{}", "*".bright_yellow(), content.bright_yellow(), NEWLINE)
    } else {
        format!("{} {}{}", format!("<{}>", username).bright_blue().bold(), content, NEWLINE)
    }
}

/// Unicode box-drawing table; column widths fit the widest cell.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let columns = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(columns) {
            widths[i] = widths[i].max(display_width(cell));
        }
    }

    let mut out = String::new();
    let edge = |left: &str, mid: &str, right: &str, out: &mut String| {
        out.push_str(left);
        for (i, w) in widths.iter().enumerate() {
            out.push_str(&"─".repeat(w + 2));
            out.push_str(if i + 1 == columns { right } else { mid });
        }
        out.push_str(NEWLINE);
    };

    edge("┌", "┬", "┐", &mut out);
    out.push('│');
    for (i, header) in headers.iter().enumerate() {
        out.push_str(&format!(" {} ", pad(header, widths[i])));
        out.push('│');
    }
    out.push_str(NEWLINE);
    edge("├", "┼", "┤", &mut out);
    for row in rows {
        out.push('│');
        for i in 0..columns {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            out.push_str(&format!(" {} ", pad(cell, widths[i])));
            out.push('│');
        }
        out.push_str(NEWLINE);
    }
    edge("└", "┴", "┘", &mut out);
    out
}

fn pad(text: &str, width: usize) -> String {
    let padding = width.saturating_sub(display_width(text));
    format!("{}{}", text, " ".repeat(padding))
}

/// Char count, skipping SGR escape sequences.
fn display_width(text: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for c in text.chars() {
        if in_escape {
            if c == 'm' {
                in_escape = false;
            }
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            width += 1;
        }
    }
    width
}

pub fn welcome_banner(username: &str) -> String {
    let mut out = String::new();
    out.push_str(NEWLINE);
    out.push_str(&format!("{}{}", r"  _                      _             _       _     ".bright_green(), NEWLINE));
    out.push_str(&format!("{}{}", r" | |_ ___ _ __ _ __ ___ (_)_ __   __ _| |  ___| |__  ".bright_green(), NEWLINE));
    out.push_str(&format!("{}{}", r" | __/ _ \ '__| '_ ` _ \| | '_ \ / _` | | / __| '_ \ ".bright_green(), NEWLINE));
    out.push_str(&format!("{}{}", r" | ||  __/ |  | | | | | | | | | | (_| | |_\__ \ | | |".bright_green(), NEWLINE));
    out.push_str(&format!("{}{}", r"  \__\___|_|  |_| |_| |_|_|_| |_|\__,_|_(_)___/_| |_|".bright_green(), NEWLINE));
    out.push_str(NEWLINE);
    out.push_str(&format!(
        "Welcome, {}. Type {} to get started.{}",
        username.bright_green().bold(),
        "help".bright_cyan(),
        NEWLINE
    ));
    out.push_str(NEWLINE);
    out
}

/// Clear screen + home.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
/// Erase current line and return the cursor to column 1.
pub const CLEAR_LINE: &str = "\r\x1b[K";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        let rendered = table(
            &["ip", "security"],
            &[
                vec!["repo".to_string(), "1".to_string()],
                vec!["1.1.1.1".to_string(), "20".to_string()],
            ],
        );
        assert!(rendered.starts_with('┌'));
        assert!(rendered.contains("│ repo    │"));
        assert!(rendered.contains("1.1.1.1"));
        assert!(rendered.trim_end().ends_with('┘'));
    }

    #[test]
    fn test_display_width_ignores_sgr() {
        let colored_text = "abc".bright_red().to_string();
        assert_eq!(display_width(&colored_text), 3);
    }
}
