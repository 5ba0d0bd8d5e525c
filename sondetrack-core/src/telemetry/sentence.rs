//! Habitat sentence fields
//!
//! Pure functions for splitting a sentence into fields and for building
//! sentences and packets again. No I/O.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};

use super::checksum::format_checksum;
use super::{DecodeError, MAX_FIELDS, MIN_FIELDS};

const SENTENCE_START: &str = "$$";
const SERIAL_PREFIX: &str = "RS_";
const CHECKSUM_DELIMITER: char = '*';

/// The positional fields of one sentence
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceFields {
    /// Sonde id with the `$$` and `RS_` prefixes removed
    pub id: String,
    pub frame: String,
    pub time: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub vel_h: f64,
    pub temp: f64,
    pub humidity: f64,
    /// Free text before the checksum delimiter, empty if the sentence has none
    pub comment: String,
    pub checksum: Option<String>,
}

impl SentenceFields {
    /// Split a sentence line into its fields
    ///
    /// At most [`MAX_FIELDS`] fields are used, anything after the tenth comma
    /// is ignored. The checksum is cut off the last field that was used.
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let mut fields: Vec<&str> = line.trim().split(',').take(MAX_FIELDS).collect();
        if fields.len() < MIN_FIELDS {
            return Err(DecodeError::FieldCount {
                found: fields.len(),
            });
        }

        if let Some(last) = fields.last_mut() {
            if let Some((value, _)) = last.split_once(CHECKSUM_DELIMITER) {
                *last = value;
            }
        }
        // Taken from the whole line, the delimiter may sit past the last field used
        let checksum = split_checksum(line.trim()).1.map(str::to_string);

        Ok(SentenceFields {
            id: normalise_id(fields[0]),
            frame: fields[1].to_string(),
            time: fields[2].to_string(),
            lat: number("lat", fields[3])?,
            lon: number("lon", fields[4])?,
            alt: number("alt", fields[5])?,
            vel_h: number("vel_h", fields[6])?,
            temp: number("temp", fields[7])?,
            humidity: number("humidity", fields[8])?,
            comment: fields.get(9).map(|c| c.to_string()).unwrap_or_default(),
            checksum,
        })
    }

    /// Compare the received checksum with the one computed over `line`
    pub fn verify_checksum(&self, line: &str) -> Result<(), DecodeError> {
        let line = line.trim();
        let (body, received) = split_checksum(line.strip_prefix(SENTENCE_START).unwrap_or(line));
        let computed = format_checksum(body.as_bytes());
        let received = received.unwrap_or_default().to_string();
        if received.eq_ignore_ascii_case(&computed) {
            Ok(())
        } else {
            Err(DecodeError::Checksum { received, computed })
        }
    }
}

/// Split off the text after the last checksum delimiter
fn split_checksum(line: &str) -> (&str, Option<&str>) {
    match line.rsplit_once(CHECKSUM_DELIMITER) {
        Some((body, crc)) => (body, Some(crc.trim())),
        None => (line, None),
    }
}

/// Remove the sentence start and serial prefixes, once each
fn normalise_id(raw: &str) -> String {
    raw.replacen(SENTENCE_START, "", 1)
        .replacen(SERIAL_PREFIX, "", 1)
}

fn number(field: &'static str, value: &str) -> Result<f64, DecodeError> {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(DecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Build a habitat sentence, including checksum and trailing newline
///
/// `fields.id` is used verbatim as the payload callsign. Commas in the
/// comment are replaced so that the field count stays intact.
pub fn encode_sentence(fields: &SentenceFields) -> String {
    let mut sentence = format!(
        "{}{},{},{},{:.5},{:.5},{},{:.1},{:.1},{:.1}",
        SENTENCE_START,
        fields.id,
        fields.frame,
        fields.time,
        fields.lat,
        fields.lon,
        fields.alt as i64,
        fields.vel_h,
        fields.temp,
        fields.humidity
    );
    if !fields.comment.is_empty() {
        sentence.push(',');
        sentence.push_str(&fields.comment.replace(',', "_"));
    }
    let checksum = format_checksum(&sentence.as_bytes()[SENTENCE_START.len()..]);
    format!("{}{}{}\n", sentence, CHECKSUM_DELIMITER, checksum)
}

/// Wrap a sentence in a feed packet as uploaded by a single receiver
pub fn encode_packet(sentence: &str, receiver: &str, now: DateTime<Utc>) -> serde_json::Value {
    let date = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    serde_json::json!({
        "type": "payload_telemetry",
        "data": {
            "_raw": STANDARD.encode(sentence.as_bytes()),
        },
        "receivers": {
            receiver: {
                "time_created": date,
                "time_uploaded": date,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> SentenceFields {
        SentenceFields {
            id: "RS_M1234567".to_string(),
            frame: "1563".to_string(),
            time: "23:20:47".to_string(),
            lat: -34.94541,
            lon: 138.52819,
            alt: 761.7,
            vel_h: 4.3,
            temp: -273.0,
            humidity: 0.0,
            comment: "RS92, 401.520 MHz".to_string(),
            checksum: None,
        }
    }

    #[test]
    fn test_comment_truncated_at_checksum() {
        let f = SentenceFields::parse("$$RS_A,1,00:00:00,1,2,3,4,5,6,clear sky*A1B2").unwrap();
        assert_eq!(f.comment, "clear sky");
        assert_eq!(f.checksum.as_deref(), Some("A1B2"));
    }

    #[test]
    fn test_id_normalisation() {
        assert_eq!(normalise_id("$$RS_ABC123"), "ABC123");
        assert_eq!(normalise_id("RS_ABC123"), "ABC123");
        assert_eq!(normalise_id("$$N0CALL"), "N0CALL");
        // Only the first occurrence is removed
        assert_eq!(normalise_id("$$RS_RS_X"), "RS_X");
    }

    #[test]
    fn test_encode_sentence_layout() {
        let s = encode_sentence(&sample());
        assert!(s.starts_with("$$RS_M1234567,1563,23:20:47,-34.94541,138.52819,761,4.3,-273.0,0.0,RS92_ 401.520 MHz*"));
        assert!(s.ends_with('\n'));
    }

    #[test]
    fn test_encoded_sentence_passes_verification() {
        let s = encode_sentence(&sample());
        let fields = SentenceFields::parse(&s).unwrap();
        assert_eq!(fields.id, "M1234567");
        assert!(fields.verify_checksum(s.trim()).is_ok());
    }

    #[test]
    fn test_missing_checksum_fails_verification() {
        let line = "$$RS_A,1,00:00:00,1,2,3,4,5,6,no checksum";
        let fields = SentenceFields::parse(line).unwrap();
        assert!(matches!(
            fields.verify_checksum(line),
            Err(DecodeError::Checksum { .. })
        ));
    }

    #[test]
    fn test_checksum_after_comment_with_commas() {
        let body = "RS_ABC123,1,00:00:00,1,2,3,4,5,6,RS41, 402.500 MHz";
        let line = format!("$${}*{}", body, format_checksum(body.as_bytes()));

        let fields = SentenceFields::parse(&line).unwrap();
        assert_eq!(fields.comment, "RS41");
        assert_eq!(fields.checksum, Some(format_checksum(body.as_bytes())));
        assert!(fields.verify_checksum(&line).is_ok());

        let tampered = line.replace("402.500", "402.501");
        assert!(matches!(
            fields.verify_checksum(&tampered),
            Err(DecodeError::Checksum { .. })
        ));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for line in [
            "$$RS_A,1,00:00:00,NaN,2,3,4,5,6,x",
            "$$RS_A,1,00:00:00,1,inf,3,4,5,6,x",
            "$$RS_A,1,00:00:00,1,2,-infinity,4,5,6,x",
        ] {
            assert!(
                matches!(SentenceFields::parse(line), Err(DecodeError::InvalidNumber { .. })),
                "{}",
                line
            );
        }
    }

    #[test]
    fn test_encode_packet_shape() {
        let now = Utc.with_ymd_and_hms(2018, 3, 1, 1, 2, 3).unwrap();
        let packet = encode_packet("$$X,1*0000\n", "N0CALL", now);
        assert_eq!(packet["data"]["_raw"], STANDARD.encode("$$X,1*0000\n"));
        assert_eq!(
            packet["receivers"]["N0CALL"]["time_created"],
            "2018-03-01T01:02:03.000000Z"
        );
    }
}
