//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer encoding.

use super::{Error, Result, CRLF};
use bytes::{BufMut, BytesMut};

/// The zero-size chunk terminating a chunked body (no trailers)
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest chunk-size or trailer line accepted by the decoder
const MAX_LINE_LEN: usize = 4096;

/// Append `data` as one chunk
///
/// Empty data is skipped since a zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    if data.is_empty() {
        return;
    }

    out.reserve(data.len() + 20);
    out.put_slice(format!("{:x}", data.len()).as_bytes());
    out.put_slice(CRLF.as_bytes());
    out.put_slice(data);
    out.put_slice(CRLF.as_bytes());
}

/// Append the last chunk
pub fn encode_last_chunk(out: &mut BytesMut) {
    out.put_slice(LAST_CHUNK);
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding format
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
        }
    }

    /// Decode from the input buffer
    ///
    /// Returns (bytes_consumed, bytes_decoded, is_complete). Input that does
    /// not yet hold a whole size line, chunk terminator or trailer line is
    /// left unconsumed.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize, bool)> {
        let mut input_pos = 0;
        let mut output_pos = 0;

        while input_pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let line = match take_line(&input[input_pos..])? {
                        Some((line, used)) => {
                            input_pos += used;
                            line
                        }
                        None => break,
                    };

                    // extensions after ';' are ignored
                    let size = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size = std::str::from_utf8(size)
                        .map(|s| s.trim_matches(|c| c == ' ' || c == '\t'))
                        .map_err(|_| Error::InvalidChunkSize("non-ASCII".to_string()))?;
                    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(Error::InvalidChunkSize(size.to_string()));
                    }
                    self.chunk_size = usize::from_str_radix(size, 16)
                        .map_err(|_| Error::InvalidChunkSize(size.to_string()))?;
                    self.chunk_read = 0;

                    if self.chunk_size == 0 {
                        self.state = DecoderState::Trailer;
                    } else {
                        self.state = DecoderState::ChunkData;
                    }
                }

                DecoderState::ChunkData => {
                    let remaining_in_chunk = self.chunk_size - self.chunk_read;
                    let available_input = input.len() - input_pos;
                    let available_output = output.len() - output_pos;

                    let to_copy = remaining_in_chunk.min(available_input).min(available_output);

                    output[output_pos..output_pos + to_copy]
                        .copy_from_slice(&input[input_pos..input_pos + to_copy]);

                    input_pos += to_copy;
                    output_pos += to_copy;
                    self.chunk_read += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    } else {
                        // Need more data or output space
                        break;
                    }
                }

                DecoderState::ChunkEnd => {
                    match take_line(&input[input_pos..])? {
                        Some((line, used)) => {
                            if !line.is_empty() {
                                return Err(Error::Parse("Expected CRLF after chunk".to_string()));
                            }
                            input_pos += used;
                            self.state = DecoderState::ChunkSize;
                        }
                        None => break,
                    }
                }

                DecoderState::Trailer => {
                    // Trailer headers are skipped up to the empty line
                    match take_line(&input[input_pos..])? {
                        Some((line, used)) => {
                            input_pos += used;
                            if line.is_empty() {
                                self.state = DecoderState::Complete;
                                return Ok((input_pos, output_pos, true));
                            }
                        }
                        None => break,
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((input_pos, output_pos, self.state == DecoderState::Complete))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Reset the decoder for reuse
    pub fn reset(&mut self) {
        self.state = DecoderState::ChunkSize;
        self.chunk_size = 0;
        self.chunk_read = 0;
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split one line off the front of `buf`
///
/// Returns the line without its terminator and the number of bytes used.
fn take_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let line = &buf[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Ok(Some((line, pos + 1)))
        }
        None if buf.len() > MAX_LINE_LEN => {
            Err(Error::InvalidChunkSize("line too long".to_string()))
        }
        None => Ok(None),
    }
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = Vec::new();
    let mut temp = vec![0u8; 8192];
    let mut input_pos = 0;

    loop {
        let (consumed, decoded, complete) = decoder.decode(&input[input_pos..], &mut temp)?;

        output.extend_from_slice(&temp[..decoded]);
        input_pos += consumed;

        if complete {
            break;
        }
        if consumed == 0 && decoded == 0 {
            return Err(Error::Incomplete);
        }
    }

    Ok(output)
}

/// Encode data as chunked body
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut output = BytesMut::new();

    for chunk in data.chunks(chunk_size.max(1)) {
        encode_chunk(chunk, &mut output);
    }

    encode_last_chunk(&mut output);

    output.to_vec()
}
