use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use chardet::charset2encoding;
use encoding_rs::Encoding;
use tracing::trace;

/// The bytes of a text part could not be decoded under the charset the
/// message claimed, nor under the charset sniffed from the bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingError {
    /// Charset label taken from the Content-Type header.
    pub claimed: String,
    /// Best guess from content sniffing, if the sniffer produced one.
    pub detected: Option<String>,
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detected {
            Some(ref detected) => write!(
                f,
                "text is neither valid {:?} (claimed) nor {:?} (detected)",
                self.claimed, detected
            ),
            None => write!(
                f,
                "text is not valid {:?} (claimed) and no other charset was detected",
                self.claimed
            ),
        }
    }
}

impl StdError for EncodingError {}

/// Decodes a text payload, trusting the claimed charset first and falling
/// back to content sniffing when the claim turns out to be a lie.
///
/// Mail in the wild routinely mislabels its charset. Rather than replace
/// undecodable byte sequences with U+FFFD, every decode here is strict, and
/// a payload that survives neither the claimed nor the detected charset is
/// reported as undecodable so the caller can skip the message.
pub fn decode(bytes: &[u8], claimed: &str) -> Result<String, EncodingError> {
    if let Some(text) = decode_strict(bytes, claimed) {
        return Ok(text);
    }

    let (detected, confidence, _) = chardet::detect(bytes);
    trace!(
        claimed,
        detected,
        confidence,
        "claimed charset failed, trying detected one"
    );
    if !detected.is_empty() {
        if let Some(text) = decode_strict(bytes, charset2encoding(&detected)) {
            return Ok(text);
        }
    }

    Err(EncodingError {
        claimed: claimed.to_string(),
        detected: if detected.is_empty() {
            None
        } else {
            Some(detected)
        },
    })
}

/// Strict single-charset decode. Returns `None` for unknown labels and for
/// byte sequences the charset cannot represent.
fn decode_strict(bytes: &[u8], label: &str) -> Option<String> {
    let encoding = Encoding::for_label(label.as_bytes())?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}
