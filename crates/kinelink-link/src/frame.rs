//! Frame decoding.
//!
//! The firmware sends one sample per line in one of two shapes:
//!
//! ```text
//! 0.12,-0.98,0.03                      # Csv { fields: 3 }  (accY,accX,accZ)
//! s1:12.5,s2:40.0,s3:8.1,s4:40,s5:40   # Named { keys: s1..s5 }
//! {"s1":12.5,"s2":40.0,"s3":8.1}       # Named, JSON record
//! ```
//!
//! Comma-separated frames are strict: the field count must match and every
//! field must be a finite number.  Named frames accept `key:value` or
//! `key=value` pairs separated by commas, semicolons or whitespace, or a
//! JSON object; values are reordered to the configured key list and unknown
//! keys are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use kinelink_types::KineError;

/// Shape of a telemetry line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FrameFormat {
    /// Positional comma-separated values.
    Csv { fields: usize },
    /// Named numeric fields; channel `i` is the value of `keys[i]`.
    Named { keys: Vec<String> },
}

impl FrameFormat {
    /// `s1..sN` named record, the proximity-sensor board default.
    pub fn proximity(channels: usize) -> Self {
        FrameFormat::Named {
            keys: (1..=channels).map(|i| format!("s{i}")).collect(),
        }
    }

    /// `accY,accX,accZ` tilt record.
    pub fn tilt() -> Self {
        FrameFormat::Csv { fields: 3 }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            FrameFormat::Csv { fields } => *fields,
            FrameFormat::Named { keys } => keys.len(),
        }
    }
}

/// Decodes lines of one [`FrameFormat`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    format: FrameFormat,
    marker: Option<String>,
}

impl FrameCodec {
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] for a format with no channels.
    pub fn new(format: FrameFormat) -> Result<Self, KineError> {
        if format.channel_count() == 0 {
            return Err(KineError::InvalidConfig(
                "frame format must carry at least one channel".to_string(),
            ));
        }
        Ok(Self {
            format,
            marker: None,
        })
    }

    /// Accept probe answers containing `marker` even when they are not a
    /// full frame (e.g. a firmware banner).
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.marker = (!marker.is_empty()).then_some(marker);
        self
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn channel_count(&self) -> usize {
        self.format.channel_count()
    }

    /// Decode one line (terminator already stripped) into channel values.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::FrameParse`] when the line does not have the
    /// expected shape.
    pub fn decode(&self, line: &str) -> Result<Vec<f32>, KineError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(parse_error("empty line"));
        }
        match &self.format {
            FrameFormat::Csv { fields } => decode_csv(line, *fields),
            FrameFormat::Named { keys } if line.starts_with('{') => decode_json(line, keys),
            FrameFormat::Named { keys } => decode_pairs(line, keys),
        }
    }

    /// Whether a probe answer identifies the expected device.
    pub fn matches_probe(&self, line: &str) -> bool {
        if self.decode(line).is_ok() {
            return true;
        }
        self.marker.as_deref().is_some_and(|m| line.contains(m))
    }
}

fn parse_error(reason: impl Into<String>) -> KineError {
    KineError::FrameParse(reason.into())
}

fn parse_value(field: &str, raw: &str) -> Result<f32, KineError> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| parse_error(format!("field {field} is not numeric: {raw:?}")))?;
    if !value.is_finite() {
        return Err(parse_error(format!("field {field} is not finite")));
    }
    Ok(value)
}

fn decode_csv(line: &str, fields: usize) -> Result<Vec<f32>, KineError> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != fields {
        return Err(parse_error(format!(
            "expected {fields} fields, got {}",
            parts.len()
        )));
    }
    parts
        .iter()
        .enumerate()
        .map(|(i, raw)| parse_value(&i.to_string(), raw))
        .collect()
}

/// Split a pairs line into `key:value` tokens.  Whitespace around the
/// separator is allowed, so `s1: 12.5` and `s1 = 12.5` stay one pair.
fn pair_tokens(line: &str) -> Vec<String> {
    let is_separator = |c: char| c == ':' || c == '=';
    let mut tokens: Vec<String> = Vec::new();
    for piece in line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let joins = piece.starts_with(is_separator)
            || tokens.last().is_some_and(|last| last.ends_with(is_separator));
        match tokens.last_mut() {
            Some(last) if joins => last.push_str(piece),
            _ => tokens.push(piece.to_string()),
        }
    }
    tokens
}

fn decode_pairs(line: &str, keys: &[String]) -> Result<Vec<f32>, KineError> {
    let tokens = pair_tokens(line);
    let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(keys.len());
    for token in &tokens {
        let (key, value) = token
            .split_once([':', '='])
            .ok_or_else(|| parse_error(format!("token without value: {token:?}")))?;
        pairs.push((key.trim().trim_matches('"'), value));
    }

    keys.iter()
        .map(|key| {
            let raw = pairs
                .iter()
                .find(|(k, _)| *k == key.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| parse_error(format!("missing field {key}")))?;
            parse_value(key, raw)
        })
        .collect()
}

fn decode_json(line: &str, keys: &[String]) -> Result<Vec<f32>, KineError> {
    let record: Map<String, Value> =
        serde_json::from_str(line).map_err(|e| parse_error(format!("invalid record: {e}")))?;
    keys.iter()
        .map(|key| {
            let value = record
                .get(key)
                .ok_or_else(|| parse_error(format!("missing field {key}")))?;
            match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(|v| v as f32)
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| parse_error(format!("field {key} out of range"))),
                Value::String(s) => parse_value(key, s),
                _ => Err(parse_error(format!("field {key} is not numeric"))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tilt() -> FrameCodec {
        FrameCodec::new(FrameFormat::tilt()).unwrap()
    }

    fn proximity() -> FrameCodec {
        FrameCodec::new(FrameFormat::proximity(5)).unwrap()
    }

    #[test]
    fn csv_frame_decodes_in_order() {
        let values = tilt().decode("0.12,-0.98,0.03").unwrap();
        assert_eq!(values, vec![0.12, -0.98, 0.03]);
    }

    #[test]
    fn csv_tolerates_spaces_and_cr() {
        let values = tilt().decode(" 1.0 , 2.0,3\r").unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn csv_rejects_non_numeric_field() {
        let err = tilt().decode("3.5,abc,1.2").unwrap_err();
        assert!(matches!(err, KineError::FrameParse(_)));
    }

    #[test]
    fn csv_rejects_wrong_field_count() {
        assert!(tilt().decode("1.0,2.0").is_err());
        assert!(tilt().decode("1.0,2.0,3.0,4.0").is_err());
        assert!(tilt().decode("1.0,2.0,").is_err());
    }

    #[test]
    fn csv_rejects_non_finite_values() {
        assert!(tilt().decode("NaN,0,0").is_err());
        assert!(tilt().decode("inf,0,0").is_err());
    }

    #[test]
    fn named_pairs_are_reordered_by_key() {
        let values = proximity()
            .decode("s3:8.1 s1=12.5;s2:40,s5:40,s4:39.5")
            .unwrap();
        assert_eq!(values, vec![12.5, 40.0, 8.1, 39.5, 40.0]);
    }

    #[test]
    fn named_pairs_allow_spaces_around_separator() {
        let values = proximity()
            .decode("s1: 12.5, s2: 40, s3 = 8.1; s4 :39.5 s5 : 40")
            .unwrap();
        assert_eq!(values, vec![12.5, 40.0, 8.1, 39.5, 40.0]);
        assert!(proximity().decode("s1: , s2:2,s3:3,s4:4,s5:5").is_err());
    }

    #[test]
    fn named_pairs_ignore_unknown_keys() {
        let values = proximity()
            .decode("t:99,s1:1,s2:2,s3:3,s4:4,s5:5")
            .unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn named_pairs_missing_key_rejected() {
        assert!(proximity().decode("s1:1,s2:2,s3:3,s4:4").is_err());
        assert!(proximity().decode("s1:1,s2,s3:3,s4:4,s5:5").is_err());
    }

    #[test]
    fn json_record_decodes() {
        let values = proximity()
            .decode(r#"{"s1":12.5,"s2":40,"s3":"8.1","s4":40,"s5":40,"fw":"1.2"}"#)
            .unwrap();
        assert_eq!(values, vec![12.5, 40.0, 8.1, 40.0, 40.0]);
    }

    #[test]
    fn json_record_with_non_numeric_value_rejected() {
        assert!(
            proximity()
                .decode(r#"{"s1":true,"s2":1,"s3":1,"s4":1,"s5":1}"#)
                .is_err()
        );
        assert!(proximity().decode(r#"{"s1":1"#).is_err());
    }

    #[test]
    fn empty_line_rejected() {
        assert!(tilt().decode("   ").is_err());
    }

    #[test]
    fn probe_accepts_frame_or_marker() {
        let codec = proximity().with_marker("IRSENSE");
        assert!(codec.matches_probe("s1:1,s2:2,s3:3,s4:4,s5:5"));
        assert!(codec.matches_probe("IRSENSE v2 ready"));
        assert!(!codec.matches_probe("AT+OK"));
        assert!(!proximity().matches_probe("IRSENSE v2 ready"));
    }

    #[test]
    fn zero_channel_format_rejected() {
        assert!(FrameCodec::new(FrameFormat::Csv { fields: 0 }).is_err());
        assert!(FrameCodec::new(FrameFormat::Named { keys: Vec::new() }).is_err());
    }

    #[test]
    fn format_roundtrips_through_serde() {
        let format: FrameFormat =
            serde_json::from_str(r#"{"kind":"named","keys":["s1","s2"]}"#).unwrap();
        assert_eq!(format.channel_count(), 2);
        let csv: FrameFormat = serde_json::from_str(r#"{"kind":"csv","fields":3}"#).unwrap();
        assert_eq!(csv, FrameFormat::tilt());
    }
}
