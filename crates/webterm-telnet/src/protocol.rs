// Telnet option handling
//
// The client announces NAWS (RFC 1073) right after connect and reports the
// window size, accepts the server's ECHO and SUPPRESS-GO-AHEAD offers, and
// refuses everything else, once per option. Server commands are stripped from
// the data stream; the decoder keeps its state across reads, so a command
// split between two reads is still recognised.

use bytes::{BufMut, Bytes, BytesMut};

/// Interpret As Command
pub const IAC: u8 = 0xFF;
const DONT: u8 = 0xFE;
const DO: u8 = 0xFD;
const WONT: u8 = 0xFC;
const WILL: u8 = 0xFB;
/// Subnegotiation begin
const SB: u8 = 0xFA;
/// Subnegotiation end
const SE: u8 = 0xF0;

const OPT_ECHO: u8 = 1;
const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
/// Negotiate About Window Size
pub const OPT_NAWS: u8 = 31;

/// Options the server may enable on its side.
const ACCEPTED_REMOTE: &[u8] = &[OPT_ECHO, OPT_SUPPRESS_GO_AHEAD];

/// `IAC WILL NAWS` followed by the size report.
pub fn naws_negotiation(rows: u16, cols: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&[IAC, WILL, OPT_NAWS]);
    buf.extend_from_slice(&naws_size_report(rows, cols));
    buf
}

/// `IAC SB NAWS <width:u16> <height:u16> IAC SE`, with 0xFF bytes doubled.
pub fn naws_size_report(rows: u16, cols: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13);
    buf.extend_from_slice(&[IAC, SB, OPT_NAWS]);
    for b in cols.to_be_bytes().into_iter().chain(rows.to_be_bytes()) {
        buf.push(b);
        if b == IAC {
            buf.push(IAC);
        }
    }
    buf.extend_from_slice(&[IAC, SE]);
    buf
}

/// Double every 0xFF so user data is never read as a command.
pub fn escape_iac(data: Bytes) -> Bytes {
    if !data.contains(&IAC) {
        return data;
    }
    let mut out = BytesMut::with_capacity(data.len() + 8);
    for &b in data.iter() {
        out.put_u8(b);
        if b == IAC {
            out.put_u8(IAC);
        }
    }
    out.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Result of decoding one read from the server.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Terminal data with commands removed.
    pub data: Bytes,
    /// Negotiation replies to write back to the server.
    pub reply: Bytes,
}

/// Strips telnet commands from server output and answers negotiations.
#[derive(Debug)]
pub struct TelnetDecoder {
    state: State,
    rows: u16,
    cols: u16,
    remote_enabled: [bool; 256],
    remote_refused: [bool; 256],
    local_refused: [bool; 256],
}

impl TelnetDecoder {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            state: State::Data,
            rows,
            cols,
            remote_enabled: [false; 256],
            remote_refused: [false; 256],
            local_refused: [false; 256],
        }
    }

    pub fn decode(&mut self, input: &[u8]) -> Decoded {
        let mut data = BytesMut::with_capacity(input.len());
        let mut reply = BytesMut::new();

        for &b in input {
            self.state = match self.state {
                State::Data if b == IAC => State::Iac,
                State::Data => {
                    data.put_u8(b);
                    State::Data
                }
                State::Iac => match b {
                    IAC => {
                        data.put_u8(IAC);
                        State::Data
                    }
                    WILL | WONT | DO | DONT => State::Option(b),
                    SB => State::Sub,
                    // NOP, GA, AYT and friends carry no data.
                    _ => State::Data,
                },
                State::Option(command) => {
                    self.negotiate(command, b, &mut reply);
                    State::Data
                }
                State::Sub if b == IAC => State::SubIac,
                State::Sub => State::Sub,
                State::SubIac if b == SE => State::Data,
                State::SubIac => State::Sub,
            };
        }

        Decoded {
            data: data.freeze(),
            reply: reply.freeze(),
        }
    }

    fn negotiate(&mut self, command: u8, option: u8, reply: &mut BytesMut) {
        let idx = option as usize;
        match command {
            DO if option == OPT_NAWS => {
                reply.extend_from_slice(&naws_size_report(self.rows, self.cols));
            }
            DO => {
                if !self.local_refused[idx] {
                    self.local_refused[idx] = true;
                    reply.extend_from_slice(&[IAC, WONT, option]);
                }
            }
            WILL if ACCEPTED_REMOTE.contains(&option) => {
                if !self.remote_enabled[idx] {
                    self.remote_enabled[idx] = true;
                    reply.extend_from_slice(&[IAC, DO, option]);
                }
            }
            WILL => {
                if !self.remote_refused[idx] {
                    self.remote_refused[idx] = true;
                    reply.extend_from_slice(&[IAC, DONT, option]);
                }
            }
            WONT => self.remote_enabled[idx] = false,
            _ => {}
        }
    }
}
