use std::collections::HashSet;
use std::sync::mpsc;

use imap_proto::{Capability, MailboxDatum, Response, ResponseCode, Status};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, ParseError, Result};
use crate::types::{Capabilities, Mailbox, Notification, RawMessage, Seq, Uid};

lazy_static! {
    // `* 12 FETCH (UID 451 RFC822 {2463}` -- seq, then UID first inside the
    // parens, then the length of the literal that closes the line
    static ref FETCH_PREFIX_REGEX: Regex =
        Regex::new(r"^\* (?P<seq>\d+) FETCH \(UID (?P<uid>\d+).*\{(?P<len>\d+)\}\r\n$").unwrap();
}

/// Splits the header line of one FETCH reply into the sequence number, the
/// UID, and the length of the message literal that follows it.
///
/// Servers are free to order FETCH attributes however they like, but the only
/// shape this tool ever requests is `(UID RFC822)`, so a reply that does not
/// lead with the UID is treated as a protocol failure rather than guessed at.
pub fn parse_fetch_prefix(line: &[u8]) -> Result<(Seq, Uid, usize)> {
    let line = std::str::from_utf8(line).map_err(|e| Error::Parse(ParseError::DataNotUtf8(e)))?;
    let not_a_fetch_header = || Error::Parse(ParseError::FetchLine(line.trim_end().to_string()));

    let captures = FETCH_PREFIX_REGEX.captures(line).ok_or_else(not_a_fetch_header)?;
    let seq = captures["seq"].parse().map_err(|_| not_a_fetch_header())?;
    let uid = captures["uid"].parse().map_err(|_| not_a_fetch_header())?;
    let len = captures["len"].parse().map_err(|_| not_a_fetch_header())?;
    Ok((seq, uid, len))
}

/// Walks the collected reply of a batched FETCH, pairing each reply header
/// with the literal that follows it.
///
/// Messages come back in the order the server sent them, which for a single
/// FETCH of an ascending sequence set is ascending sequence order.
pub fn parse_fetch_batch(mut lines: &[u8]) -> Result<Vec<RawMessage>> {
    let mut messages = Vec::new();

    while !lines.is_empty() {
        let header_end = match lines.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => return Err(Error::Parse(ParseError::Invalid(lines.to_vec()))),
        };
        let (seq, uid, len) = parse_fetch_prefix(&lines[..header_end])?;

        let rest = &lines[header_end..];
        if rest.len() < len {
            return Err(Error::Parse(ParseError::Invalid(rest.to_vec())));
        }
        let body = rest[..len].to_vec();

        // skip the `)` line that closes this FETCH reply
        let rest = &rest[len..];
        lines = match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => &rest[pos + 1..],
            None => &[],
        };

        messages.push(RawMessage { seq, uid, body });
    }

    Ok(messages)
}

/// Collapses sequence numbers into the shortest sequence-set notation FETCH
/// and STORE accept, e.g. `2,10:12,15`. The input does not have to be sorted
/// or unique. Returns `None` for an empty set.
pub fn compress_sequence_set(ids: &[Seq]) -> Option<String> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut run: Option<(Seq, Seq)> = None;
    for id in sorted {
        run = match run {
            None => Some((id, id)),
            Some((lo, hi)) if id == hi + 1 => Some((lo, hi + 1)),
            Some((lo, hi)) => {
                push_run(&mut out, lo, hi);
                Some((id, id))
            }
        };
    }

    let (lo, hi) = run?;
    push_run(&mut out, lo, hi);
    Some(out)
}

fn push_run(out: &mut String, lo: Seq, hi: Seq) {
    if !out.is_empty() {
        out.push(',');
    }
    out.push_str(&lo.to_string());
    if hi != lo {
        out.push(':');
        out.push_str(&hi.to_string());
    }
}

/// Parses the untagged responses to a SEARCH, returning the matching
/// sequence numbers in ascending order.
pub fn parse_ids(lines: &[u8], unsolicited: &mut mpsc::Sender<Notification>) -> Result<Vec<Seq>> {
    let mut lines = lines;
    let mut ids = Vec::new();
    loop {
        if lines.is_empty() {
            ids.sort_unstable();
            ids.dedup();
            break Ok(ids);
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::MailboxData(MailboxDatum::Search(c)))) => {
                lines = rest;
                ids.extend(c);
            }
            Ok((rest, data)) => {
                lines = rest;
                if let Some(resp) = try_handle_unilateral(data, unsolicited) {
                    break Err(resp.into());
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

/// Parses the untagged responses to SELECT or EXAMINE into a mailbox summary.
pub fn parse_mailbox(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<Notification>,
) -> Result<Mailbox> {
    let mut lines = lines;
    let mut mailbox = Mailbox::default();

    loop {
        if lines.is_empty() {
            break Ok(mailbox);
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((
                rest,
                Response::Data {
                    status: Status::Ok,
                    code,
                    ..
                },
            )) => {
                lines = rest;
                match code {
                    Some(ResponseCode::UidValidity(v)) => mailbox.uid_validity = Some(v),
                    Some(ResponseCode::UidNext(v)) => mailbox.uid_next = Some(v),
                    Some(ResponseCode::Unseen(v)) => mailbox.unseen = Some(v),
                    _ => {}
                }
            }
            Ok((rest, Response::MailboxData(m))) => {
                lines = rest;
                match m {
                    MailboxDatum::Exists(e) => mailbox.exists = e,
                    MailboxDatum::Recent(r) => mailbox.recent = r,
                    // flag lists don't matter to a watch-and-fetch client
                    _ => {}
                }
            }
            Ok((rest, resp)) => {
                lines = rest;
                if let Some(resp) = try_handle_unilateral(resp, unsolicited) {
                    break Err(resp.into());
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

/// Parses the untagged responses to a CAPABILITY command.
pub fn parse_capabilities(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<Notification>,
) -> Result<Capabilities> {
    let mut lines = lines;
    let mut caps = HashSet::new();
    loop {
        if lines.is_empty() {
            break Ok(Capabilities(caps));
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::Capabilities(c))) => {
                lines = rest;
                caps.extend(c.into_iter().map(capability_name));
            }
            Ok((rest, data)) => {
                lines = rest;
                if let Some(resp) = try_handle_unilateral(data, unsolicited) {
                    break Err(resp.into());
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

fn capability_name(cap: Capability<'_>) -> String {
    match cap {
        Capability::Imap4rev1 => "IMAP4rev1".to_string(),
        Capability::Auth(mech) => format!("AUTH={}", mech),
        Capability::Atom(atom) => atom.into_owned(),
    }
}

/// Consumes response lines that carry nothing we asked for, routing
/// unilateral updates into the notification channel. The FETCH echoes a
/// STORE sends back for changed flags are dropped here too.
pub(crate) fn parse_unsolicited(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<Notification>,
) -> Result<()> {
    let mut lines = lines;
    loop {
        if lines.is_empty() {
            break Ok(());
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::Fetch(..))) => {
                lines = rest;
            }
            Ok((rest, data)) => {
                lines = rest;
                if let Some(resp) = try_handle_unilateral(data, unsolicited) {
                    break Err(resp.into());
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

/// Parses one line the server pushed during IDLE, routing mailbox changes
/// into the notification channel.
///
/// Returns true once the tagged completion of the IDLE command has been
/// seen, i.e. after a DONE has been acknowledged.
pub(crate) fn parse_idle(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<Notification>,
) -> Result<bool> {
    let mut lines = lines;
    let mut done = false;
    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::Done { status, information, .. })) => {
                lines = rest;
                match status {
                    Status::Ok => done = true,
                    Status::Bad => {
                        return Err(Error::Bad(
                            information
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "no explanation given".to_string()),
                        ))
                    }
                    _ => {
                        return Err(Error::No(
                            information
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "no explanation given".to_string()),
                        ))
                    }
                }
            }
            Ok((rest, Response::Continue { .. })) => {
                // the "+ idling" acknowledgement when IDLE is re-issued
                lines = rest;
            }
            Ok((
                rest,
                Response::Data {
                    status: Status::Ok, ..
                },
            )) => {
                // some servers drop "* OK Still here" lines while idling
                lines = rest;
            }
            Ok((rest, resp)) => {
                lines = rest;
                if let Some(resp) = try_handle_unilateral(resp, unsolicited) {
                    return Err(resp.into());
                }
            }
            _ => return Err(Error::Parse(ParseError::Invalid(lines.to_vec()))),
        }
    }
    Ok(done)
}

// check if this is simply a unilateral server response
// (see Section 7 of RFC 3501):
pub(crate) fn try_handle_unilateral<'a>(
    res: Response<'a>,
    unsolicited: &mut mpsc::Sender<Notification>,
) -> Option<Response<'a>> {
    match Notification::try_from(res) {
        Ok(notification) => {
            // the session owns the receiving end, so the channel cannot be
            // closed while we are parsing on its behalf
            let _ = unsolicited.send(notification);
            None
        }
        Err(res) => Some(res),
    }
}
