use std::{collections::HashMap, io};

use bytes::Bytes;
use flate2::{CompressError, DecompressError, FlushCompress, FlushDecompress, Status};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::space0,
    combinator::opt,
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

use crate::{
    headers::{names, HeaderTokens},
    CompressionLevel,
};

/// Name of the per-message compression extension (RFC 7692).
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Value sent in `Sec-WebSocket-Extensions` once compression has been negotiated.
///
/// Only the "no context takeover" mode is ever offered back, in both directions.
pub const PERMESSAGE_DEFLATE_RESPONSE: &str =
    "permessage-deflate; server_no_context_takeover; client_no_context_takeover";

/// Trailer stripped from compressed payloads and restored before inflating (RFC 7692, 7.2.1).
const DEFLATE_TRAILER: [u8; 4] = [0x0, 0x0, 0xff, 0xff];

/// One extension offered by the client along with its parameters.
///
/// The extension name is stored under the empty key, every parameter under its own
/// name. Parameters given without a value map to an empty string.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtensionParams {
    params: HashMap<String, String>,
}

impl ExtensionParams {
    /// The extension name, e.g. `permessage-deflate`.
    pub fn name(&self) -> &str {
        self.get("").unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Parses every `Sec-WebSocket-Extensions` value into the extensions it offers.
///
/// Extensions are separated by commas. Anything following the extension name that is
/// not a `;` parameter is skipped, so `permessage-deflate=x` still yields an extension
/// named `permessage-deflate`. Entries without a name are dropped.
pub fn parse_extensions<S: AsRef<str>>(values: &[S]) -> Vec<ExtensionParams> {
    let mut offers = Vec::new();

    for value in values {
        let mut input = value.as_ref();
        loop {
            if let Ok((rest, offer)) = extension(input) {
                offers.push(offer);
                input = rest;
            }

            match input.find(',') {
                Some(idx) => input = &input[idx + 1..],
                None => break,
            }
        }
    }

    offers
}

/// Decides whether the client offered permessage-deflate.
///
/// The first offer carrying the extension wins; its parameters are ignored since
/// only "no context takeover" is supported.
pub(crate) fn negotiate(request: &HeaderTokens) -> bool {
    parse_extensions(request.get(names::SEC_WEBSOCKET_EXTENSIONS))
        .iter()
        .any(|offer| offer.name() == PERMESSAGE_DEFLATE)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char).parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(tag("\""), take_while(|c: char| c != '"'), tag("\"")).parse(input)
}

// ; client_max_window_bits=10
fn param(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    preceded(
        (space0, tag(";"), space0),
        pair(
            token,
            opt(preceded((space0, tag("="), space0), alt((token, quoted)))),
        ),
    )
    .parse(input)
}

fn extension(input: &str) -> IResult<&str, ExtensionParams> {
    let (input, name) = preceded(space0, token).parse(input)?;
    let (input, _) = take_while(|c: char| c != ';' && c != ',').parse(input)?;
    let (input, list) = many0(param).parse(input)?;

    let mut params = HashMap::with_capacity(list.len() + 1);
    params.insert(String::new(), name.to_owned());
    for (key, value) in list {
        params.insert(key.to_owned(), value.unwrap_or_default().to_owned());
    }

    Ok((input, ExtensionParams { params }))
}

/// Constructors handed to a [`Conn`](crate::Conn) when compression was negotiated.
///
/// The negotiation layer never compresses anything itself: it only decides that the
/// connection may, and supplies the means to build the codec.
#[derive(Clone, Copy)]
pub struct CompressionHooks {
    level: CompressionLevel,
    new_compressor: fn(CompressionLevel) -> Compressor,
    new_decompressor: fn() -> Decompressor,
}

impl CompressionHooks {
    pub(crate) fn no_context_takeover(level: CompressionLevel) -> Self {
        Self {
            level,
            new_compressor: Compressor::no_context_takeover,
            new_decompressor: Decompressor::no_context_takeover,
        }
    }

    /// Builds a compressor for outgoing messages.
    pub fn compressor(&self) -> Compressor {
        (self.new_compressor)(self.level)
    }

    /// Builds a decompressor for incoming messages.
    pub fn decompressor(&self) -> Decompressor {
        (self.new_decompressor)()
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }
}

impl std::fmt::Debug for CompressionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionHooks")
            .field("level", &self.level.level())
            .finish_non_exhaustive()
    }
}

/// Deflates whole messages, resetting the dictionary before each one.
pub struct Compressor {
    compress: flate2::Compress,
}

impl Compressor {
    pub fn no_context_takeover(level: CompressionLevel) -> Self {
        Self {
            compress: flate2::Compress::new(level, false),
        }
    }

    /// Compresses a complete message payload, without the trailing `00 00 ff ff`.
    pub fn compress(&mut self, mut input: &[u8]) -> io::Result<Bytes> {
        self.compress.reset();

        let mut output = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            if output.len() == output.capacity() {
                output.reserve(1024);
            }

            let before_in = self.compress.total_in();
            self.compress
                .compress_vec(input, &mut output, FlushCompress::Sync)
                .map_err(deflate_error)?;
            input = &input[(self.compress.total_in() - before_in) as usize..];

            // a sync flush is complete once it stops filling the buffer
            if input.is_empty() && output.len() < output.capacity() {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }

        Ok(output.into())
    }
}

/// Inflates whole messages, resetting the dictionary before each one.
pub struct Decompressor {
    decompress: flate2::Decompress,
}

impl Decompressor {
    pub fn no_context_takeover() -> Self {
        Self {
            decompress: flate2::Decompress::new(false),
        }
    }

    /// Decompresses a complete message payload as produced by [`Compressor::compress`].
    pub fn decompress(&mut self, payload: &[u8]) -> io::Result<Bytes> {
        self.decompress.reset(false);

        let mut input = Vec::with_capacity(payload.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let mut input = input.as_slice();
        let mut output = Vec::with_capacity(payload.len() * 2 + 64);
        loop {
            if output.len() == output.capacity() {
                output.reserve(1024);
            }

            let before_in = self.decompress.total_in();
            let before_out = output.len();
            let status = self
                .decompress
                .decompress_vec(input, &mut output, FlushDecompress::Sync)
                .map_err(inflate_error)?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            input = &input[consumed..];

            if status == Status::StreamEnd
                || (input.is_empty() && output.len() < output.capacity())
            {
                break;
            }
            if consumed == 0 && output.len() == before_out && output.len() < output.capacity() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "corrupt deflate stream",
                ));
            }
        }

        Ok(output.into())
    }
}

fn deflate_error(err: CompressError) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Compression error: {}", err),
    )
}

fn inflate_error(err: DecompressError) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Decompression error: {}", err),
    )
}
