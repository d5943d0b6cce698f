use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use mailparse::{
    addrparse, dateparse, parse_mail, DispositionType, MailAddr, MailAddrList, MailHeaderMap,
    MailParseError, ParsedMail,
};

use crate::decode::{self, EncodingError};

/// One mailbox from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub email: String,
    pub display_name: Option<String>,
}

/// The parsed value of a single address header, classified by how much
/// structure the header is allowed to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressHeader {
    /// Address-list headers such as From, To and Cc.
    Multi(Vec<Address>),
    /// Headers that name exactly one mailbox, such as Sender.
    Single(Address),
    /// Headers whose whole value is one bare addr-spec, such as
    /// Delivered-To, and anything that failed structured parsing.
    Unstructured(String),
}

impl AddressHeader {
    pub fn addresses(&self) -> Vec<Address> {
        match self {
            AddressHeader::Multi(addresses) => addresses.clone(),
            AddressHeader::Single(address) => vec![address.clone()],
            AddressHeader::Unstructured(value) if value.is_empty() => Vec::new(),
            AddressHeader::Unstructured(value) => vec![Address {
                email: value.clone(),
                display_name: None,
            }],
        }
    }
}

/// Who a message is from and who it was delivered to.
///
/// The sender side folds the Sender header in after From, and the recipient
/// side folds Delivered-To in after To, so a message that only carries the
/// trace headers still yields usable addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub from: Vec<Address>,
    pub to: Vec<Address>,
}

/// An attachment lifted out of the MIME tree, with its transfer encoding
/// already undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Content-ID with the angle brackets trimmed, or the X-Attachment-Id
    /// some webmail providers use instead.
    pub id: Option<String>,
    pub content_type: String,
    pub transfer_encoding: Option<String>,
    pub disposition: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// A fully decoded message, ready to hand to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub message_id: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub envelope: Envelope,
    /// First text part in preference order (plain before html), if the
    /// message has one.
    pub body_text: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug)]
pub enum MessageError {
    /// The MIME structure itself could not be parsed.
    Mime(MailParseError),
    /// A text part defeated both the claimed and the detected charset.
    Encoding(EncodingError),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Mime(e) => write!(f, "malformed MIME structure: {}", e),
            MessageError::Encoding(e) => write!(f, "undecodable text payload: {}", e),
        }
    }
}

impl StdError for MessageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MessageError::Mime(e) => Some(e),
            MessageError::Encoding(e) => Some(e),
        }
    }
}

impl From<MailParseError> for MessageError {
    fn from(err: MailParseError) -> Self {
        MessageError::Mime(err)
    }
}

impl From<EncodingError> for MessageError {
    fn from(err: EncodingError) -> Self {
        MessageError::Encoding(err)
    }
}

impl MailMessage {
    /// Parses raw RFC 822 bytes into the model the dispatcher works with.
    ///
    /// Anything that fails here is unfixable by retrying the same bytes, so
    /// callers log the error and move on rather than requeueing the message.
    pub fn parse(raw: &[u8]) -> Result<MailMessage, MessageError> {
        let mail = parse_mail(raw)?;

        let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
        let message_id = mail
            .headers
            .get_first_value("Message-ID")
            .map(|v| trim_angles(&v))
            .filter(|v| !v.is_empty());
        let date = mail
            .headers
            .get_first_value("Date")
            .and_then(|v| parse_date(&v));

        Ok(MailMessage {
            subject,
            message_id,
            date,
            envelope: envelope(&mail),
            body_text: body_with_preference(&mail, &["plain", "html"])?,
            attachments: collect_attachments(&mail)?,
        })
    }
}

/// Parses one address header value according to its header name.
pub fn classify_header(name: &str, value: &str) -> AddressHeader {
    match name.to_ascii_lowercase().as_str() {
        "from" | "to" | "cc" | "bcc" | "reply-to" => match addrparse(value) {
            Ok(list) => AddressHeader::Multi(flatten(&list)),
            Err(_) => AddressHeader::Unstructured(value.trim().to_string()),
        },
        "sender" => match addrparse(value).ok().and_then(|list| flatten(&list).into_iter().next()) {
            Some(address) => AddressHeader::Single(address),
            None => AddressHeader::Unstructured(value.trim().to_string()),
        },
        _ => AddressHeader::Unstructured(value.trim().to_string()),
    }
}

fn flatten(list: &MailAddrList) -> Vec<Address> {
    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push(Address {
                email: info.addr.clone(),
                display_name: info.display_name.clone(),
            }),
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(Address {
                        email: info.addr.clone(),
                        display_name: info.display_name.clone(),
                    });
                }
            }
        }
    }
    out
}

fn envelope(mail: &ParsedMail<'_>) -> Envelope {
    Envelope {
        from: collect_addresses(mail, &["from", "sender"]),
        to: collect_addresses(mail, &["to", "delivered-to"]),
    }
}

fn collect_addresses(mail: &ParsedMail<'_>, names: &[&str]) -> Vec<Address> {
    let mut out = Vec::new();
    for name in names {
        for value in mail.headers.get_all_values(name) {
            out.extend(classify_header(name, &value).addresses());
        }
    }
    out
}

fn trim_angles(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    // the lenient parser swallows sloppy real-world dates (wrong weekday,
    // missing fields) that the strict one rejects, but a value it finds no
    // date in at all comes back as zero rather than as an error
    let timestamp = dateparse(value).ok().filter(|&secs| secs != 0)?;
    Some(DateTime::from_timestamp(timestamp, 0)?.fixed_offset())
}

fn body_with_preference(
    mail: &ParsedMail<'_>,
    preference: &[&str],
) -> Result<Option<String>, MessageError> {
    for subtype in preference {
        let mimetype = format!("text/{}", subtype);
        if let Some(part) = find_text_part(mail, &mimetype) {
            let bytes = part.get_body_raw()?;
            let text = decode::decode(&bytes, &part.ctype.charset)?;
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn find_text_part<'a, 'b>(part: &'a ParsedMail<'b>, mimetype: &str) -> Option<&'a ParsedMail<'b>> {
    if part.ctype.mimetype.eq_ignore_ascii_case(mimetype)
        && part.get_content_disposition().disposition != DispositionType::Attachment
    {
        return Some(part);
    }
    part.subparts
        .iter()
        .find_map(|sub| find_text_part(sub, mimetype))
}

fn collect_attachments(mail: &ParsedMail<'_>) -> Result<Vec<Attachment>, MessageError> {
    let mut attachments = Vec::new();
    // the root part is never an attachment, even when it carries a
    // Content-Disposition of its own
    for part in &mail.subparts {
        walk_attachments(part, &mut attachments)?;
    }
    Ok(attachments)
}

fn walk_attachments(part: &ParsedMail<'_>, out: &mut Vec<Attachment>) -> Result<(), MessageError> {
    if part
        .ctype
        .mimetype
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        for sub in &part.subparts {
            walk_attachments(sub, out)?;
        }
        return Ok(());
    }
    if is_attachment(part) {
        out.push(attachment_from(part)?);
    }
    Ok(())
}

fn is_attachment(part: &ParsedMail<'_>) -> bool {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return true;
    }
    // inline images and the like count too; only the textual body types
    // are exempt without an explicit attachment disposition
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    mimetype != "text/plain" && mimetype != "text/html"
}

fn attachment_from(part: &ParsedMail<'_>) -> Result<Attachment, MessageError> {
    let content_disposition = part.get_content_disposition();
    let id = part
        .headers
        .get_first_value("Content-ID")
        .map(|v| trim_angles(&v))
        .filter(|v| !v.is_empty())
        .or_else(|| part.headers.get_first_value("X-Attachment-Id"));
    let filename = content_disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());
    let transfer_encoding = part
        .headers
        .get_first_value("Content-Transfer-Encoding")
        .map(|v| v.trim().to_ascii_lowercase());

    Ok(Attachment {
        id,
        content_type: part.ctype.mimetype.clone(),
        transfer_encoding,
        disposition: disposition_name(&content_disposition.disposition),
        filename,
        data: part.get_body_raw()?,
    })
}

fn disposition_name(disposition: &DispositionType) -> String {
    match disposition {
        DispositionType::Inline => "inline".to_string(),
        DispositionType::Attachment => "attachment".to_string(),
        DispositionType::FormData => "form-data".to_string(),
        DispositionType::Extension(name) => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_singlepart_message() {
        let raw = b"Subject: Printer on fire\r\n\
            From: \"Alice\" <alice@example.com>\r\n\
            To: help@example.com\r\n\
            Date: Fri, 21 Nov 1997 09:55:06 -0600\r\n\
            Message-ID: <1234@left.example.com>\r\n\
            \r\n\
            It is on fire again.";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.subject, "Printer on fire");
        assert_eq!(message.message_id.as_deref(), Some("1234@left.example.com"));
        assert_eq!(message.date.unwrap().timestamp(), 880127706);
        assert_eq!(
            message.envelope.from,
            vec![Address {
                email: "alice@example.com".to_string(),
                display_name: Some("Alice".to_string()),
            }]
        );
        assert_eq!(message.envelope.to[0].email, "help@example.com");
        assert_eq!(message.body_text.as_deref(), Some("It is on fire again."));
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn sender_and_delivered_to_fold_into_envelope() {
        let raw = b"From: alice@example.com\r\n\
            Sender: relay@example.com\r\n\
            To: help@example.com\r\n\
            Delivered-To: queue@example.com\r\n\
            \r\n\
            hi";
        let message = MailMessage::parse(raw).unwrap();
        let from: Vec<_> = message.envelope.from.iter().map(|a| a.email.as_str()).collect();
        let to: Vec<_> = message.envelope.to.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(from, vec!["alice@example.com", "relay@example.com"]);
        assert_eq!(to, vec!["help@example.com", "queue@example.com"]);
    }

    #[test]
    fn alternative_prefers_plain_over_html() {
        let raw = b"Subject: x\r\n\
            Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>rich</p>\r\n\
            --sep\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain\r\n\
            --sep--\r\n";
        let message = MailMessage::parse(raw).unwrap();
        // the line terminator before the closing boundary stays in the body
        assert_eq!(message.body_text.as_deref(), Some("plain\r\n"));
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn html_body_when_no_plain_part() {
        let raw = b"Subject: x\r\n\
            Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>rich</p>\r\n\
            --sep--\r\n";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.body_text.as_deref(), Some("<p>rich</p>\r\n"));
    }

    #[test]
    fn attachment_with_base64_payload() {
        let raw = b"Subject: x\r\n\
            Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            see attached\r\n\
            --sep\r\n\
            Content-Type: application/pdf; name=\"report.pdf\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
            \r\n\
            JVBERg==\r\n\
            --sep--\r\n";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.body_text.as_deref(), Some("see attached\r\n"));
        assert_eq!(message.attachments.len(), 1);
        let attachment = &message.attachments[0];
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.transfer_encoding.as_deref(), Some("base64"));
        assert_eq!(attachment.disposition, "attachment");
        assert_eq!(attachment.filename.as_deref(), Some("report.pdf"));
        assert_eq!(attachment.data, b"%PDF".to_vec());
    }

    #[test]
    fn inline_image_with_content_id_is_an_attachment() {
        let raw = b"Subject: x\r\n\
            Content-Type: multipart/related; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <img src=\"cid:img1\">\r\n\
            --sep\r\n\
            Content-Type: image/png\r\n\
            Content-ID: <img1@example.com>\r\n\
            Content-Disposition: inline\r\n\
            \r\n\
            fakepng\r\n\
            --sep--\r\n";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.attachments.len(), 1);
        let attachment = &message.attachments[0];
        assert_eq!(attachment.id.as_deref(), Some("img1@example.com"));
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.disposition, "inline");
        assert_eq!(attachment.filename, None);
    }

    #[test]
    fn root_part_is_never_an_attachment() {
        let raw = b"Subject: x\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Disposition: attachment; filename=\"blob.bin\"\r\n\
            \r\n\
            0123456789";
        let message = MailMessage::parse(raw).unwrap();
        assert!(message.attachments.is_empty());
        assert_eq!(message.body_text, None);
    }

    #[test]
    fn mislabelled_charset_recovered_by_detection() {
        let mut raw = b"Subject: x\r\n\
            Content-Type: text/plain; charset=\"utf-8\"\r\n\
            \r\n"
            .to_vec();
        // "Привет" in windows-1251 despite the utf-8 label
        raw.extend_from_slice(b"\xcf\xf0\xe8\xe2\xe5\xf2");
        let message = MailMessage::parse(&raw).unwrap();
        assert_eq!(
            message.body_text.as_deref(),
            Some("\u{41f}\u{440}\u{438}\u{432}\u{435}\u{442}")
        );
    }

    #[test]
    fn undecodable_body_is_an_encoding_error() {
        let mut raw = b"Subject: x\r\n\
            Content-Type: text/plain; charset=\"utf-8\"\r\n\
            \r\n"
            .to_vec();
        // a UTF-16LE BOM with a lone high surrogate behind it; neither the
        // label nor the detected charset decodes this
        raw.extend_from_slice(b"\xff\xfe\x00\xd8");
        match MailMessage::parse(&raw) {
            Err(MessageError::Encoding(e)) => assert_eq!(e.claimed, "utf-8"),
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[test]
    fn sloppy_date_falls_back_to_lenient_parser() {
        // 1997-11-21 was a Friday; the strict parser rejects the wrong
        // weekday, the lenient one ignores it
        let raw = b"Date: Thu, 21 Nov 1997 09:55:06 -0600\r\n\r\nhi";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.date.unwrap().timestamp(), 880127706);
    }

    #[test]
    fn garbage_date_is_none() {
        let raw = b"Date: not a date\r\n\r\nhi";
        let message = MailMessage::parse(raw).unwrap();
        assert_eq!(message.date, None);
    }

    #[test]
    fn group_addresses_are_flattened() {
        let raw = b"To: team: a@example.com, b@example.com;\r\n\r\nhi";
        let message = MailMessage::parse(raw).unwrap();
        let to: Vec<_> = message.envelope.to.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }
}
