const SUFFIXES: [char; 8] = ['k', 'K', 'm', 'M', 'g', 'G', 't', 'T'];

/// A validated bandwidth limit, kept in its original spelling since it is
/// handed to mbuffer verbatim.
#[derive(Debug, Clone)]
pub struct Bytes {
    pub text: String,
}

impl Bytes {
    pub fn try_from_str(value: &str) -> Result<Self, &'static str> {
        let mut num = String::new();
        let mut done = false;
        for c in value.chars() {
            if done {
                return Err("expected rate value to end after suffix but found more characters");
            };

            if c.is_ascii_digit() {
                num.push(c);
            } else if SUFFIXES.contains(&c) {
                done = true;
            } else {
                return Err("unrecognized character when parsing rate");
            }
        }
        let limit = num
            .parse::<u64>()
            .map_err(|_| "rate must start with at least one digit")?;
        if limit == 0 {
            return Err("rate limit cannot be zero");
        };
        Ok(Self {
            text: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_suffixed() {
        assert_eq!(Bytes::try_from_str("1048576").unwrap().text, "1048576");
        assert_eq!(Bytes::try_from_str("10m").unwrap().text, "10m");
        assert_eq!(Bytes::try_from_str("512K").unwrap().text, "512K");
    }

    #[test]
    fn rejected() {
        assert!(Bytes::try_from_str("").is_err());
        assert!(Bytes::try_from_str("m").is_err());
        assert!(Bytes::try_from_str("0").is_err());
        assert!(Bytes::try_from_str("10mb").is_err());
        assert!(Bytes::try_from_str("ten").is_err());
    }
}
