use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TypeError;

/// A point in time with the author's UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Time {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Offset from UTC in minutes.
    pub offset_minutes: i32,
}

impl Time {
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }

    /// The current time in UTC.
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self::new(seconds, 0)
    }

    fn fmt_offset(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!("{sign}{:02}{:02}", abs / 60, abs % 60)
    }
}

/// Identity plus timestamp, as recorded in commits, tags and reflogs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: Time,
}

impl Signature {
    /// Build a signature, trimming surrounding whitespace.
    ///
    /// Names and emails may not contain angle brackets or newlines since
    /// those delimit the fields in the serialized form.
    pub fn new(name: &str, email: &str, when: Time) -> Result<Self, TypeError> {
        for field in [name, email] {
            if field.contains(['<', '>', '\n']) {
                return Err(TypeError::InvalidSignature(format!(
                    "field {field:?} contains '<', '>' or a newline"
                )));
            }
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(TypeError::InvalidSignature("empty name".into()));
        }
        Ok(Self {
            name: name.to_string(),
            email: email.trim().to_string(),
            when,
        })
    }

    /// Signature stamped with the current time.
    pub fn now(name: &str, email: &str) -> Result<Self, TypeError> {
        Self::new(name, email, Time::now())
    }

    /// Parse `Name <email> 1234567890 +0130`.
    ///
    /// A missing or garbled timestamp parses as the epoch rather than
    /// failing; only the name/email framing is mandatory.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let open = s
            .rfind('<')
            .ok_or_else(|| TypeError::InvalidSignature(format!("missing '<' in {s:?}")))?;
        let close = s[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| TypeError::InvalidSignature(format!("missing '>' in {s:?}")))?;

        let name = s[..open].trim().to_string();
        let email = s[open + 1..close].trim().to_string();

        let mut rest = s[close + 1..].split_whitespace();
        let seconds = rest.next().and_then(|t| t.parse::<i64>().ok()).unwrap_or(0);
        let offset_minutes = rest.next().and_then(parse_offset).unwrap_or(0);

        Ok(Self {
            name,
            email,
            when: Time::new(seconds, offset_minutes),
        })
    }
}

fn parse_offset(tz: &str) -> Option<i32> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.when.seconds,
            self.when.fmt_offset()
        )
    }
}
