use chrono::{DateTime, Duration, Utc};

/// Number of leading characters of a token shown in logs and status output
const TOKEN_PREVIEW_CHARS: usize = 6;

/// Mask a credential for display, keeping a short prefix and the length
pub fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= TOKEN_PREVIEW_CHARS {
        "*".repeat(len)
    } else {
        let prefix: String = token.chars().take(TOKEN_PREVIEW_CHARS).collect();
        format!("{}... ({} chars)", prefix, len)
    }
}

/// Format the time left before an instant, e.g. "in 4m" or "expired"
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    if remaining <= Duration::zero() {
        "expired".to_string()
    } else if minutes < 1 {
        "in under a minute".to_string()
    } else if minutes < 60 {
        format!("in {}m", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins == 0 {
            format!("in {}h", hours)
        } else {
            format!("in {}h {}m", hours, remaining_mins)
        }
    } else {
        format!("in {}d", minutes / 1440)
    }
}

/// Format a timestamp to a more readable format
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%b %d, %Y %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token(""), "");
        assert_eq!(mask_token("abcdefghij"), "abcdef... (10 chars)");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::seconds(-5)), "expired");
        assert_eq!(format_remaining(Duration::zero()), "expired");
        assert_eq!(format_remaining(Duration::seconds(30)), "in under a minute");
        assert_eq!(format_remaining(Duration::minutes(4)), "in 4m");
        assert_eq!(format_remaining(Duration::minutes(120)), "in 2h");
        assert_eq!(format_remaining(Duration::minutes(125)), "in 2h 5m");
        assert_eq!(format_remaining(Duration::days(3)), "in 3d");
    }
}
