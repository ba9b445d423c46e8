//! FileSender: stream a local file to a connected client, either as
//! line-oriented Gopher text (with `.`-line byte-stuffing and a menu
//! terminator) or as an untouched binary transfer.

use std::path::Path;

use async_std::{
	fs::File,
	io::{prelude::*, BufReader},
};

use crate::{errors::GopherError, menu::END_OF_MENU};

/// Lines longer than this are still sent whole; this only bounds the read
/// buffer's growth, mirroring the reference's 1MiB line buffer.
const MAX_LINE_LEN: usize = 1024 * 1024;
const BINARY_CHUNK_LEN: usize = 1024 * 1024;

/// Send `path` as a Gopher text file: each line is written with its `\r\n`
/// terminator, a line that is exactly a single `.` is escaped to `. ` so it
/// can't be mistaken for the end-of-menu marker, and the transfer ends with
/// the standard `.\r\n` terminator.
pub async fn send_text(
	path: &Path,
	out: &mut (impl Write + Unpin),
) -> Result<(), GopherError> {
	let file = File::open(path)
		.await
		.map_err(|e| GopherError::NotFound(format!("{}: {e}", path.display())))?;
	let mut reader = BufReader::new(file);

	let mut line = Vec::new();
	loop {
		line.clear();
		let n = read_line_lossy(&mut reader, &mut line).await?;
		if n == 0 {
			break;
		}

		if line == b"." {
			out.write_all(b". \r\n").await?;
		} else {
			out.write_all(&line).await?;
			out.write_all(b"\r\n").await?;
		}
	}

	out.write_all(END_OF_MENU).await?;
	Ok(())
}

/// Send `path` verbatim, in 1MiB chunks, with no terminator and no
/// transformation of its bytes.
pub async fn send_binary(
	path: &Path,
	out: &mut (impl Write + Unpin),
) -> Result<(), GopherError> {
	let mut file = File::open(path)
		.await
		.map_err(|e| GopherError::NotFound(format!("{}: {e}", path.display())))?;

	let mut buf = vec![0u8; BINARY_CHUNK_LEN];
	loop {
		let n = file.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		out.write_all(&buf[..n]).await?;
	}

	Ok(())
}

/// Read one line (without its terminator), stopping at LF and dropping a
/// preceding CR, capped at [`MAX_LINE_LEN`] bytes. Returns the number of
/// bytes read including the terminator, or 0 at EOF with nothing read.
async fn read_line_lossy(
	reader: &mut (impl Read + Unpin),
	out: &mut Vec<u8>,
) -> Result<usize, GopherError> {
	let mut total = 0;
	let mut byte = [0u8; 1];

	loop {
		let n = reader.read(&mut byte).await?;
		if n == 0 {
			break;
		}
		total += 1;

		if byte[0] == b'\n' {
			if out.last() == Some(&b'\r') {
				out.pop();
			}
			break;
		}

		if out.len() < MAX_LINE_LEN {
			out.push(byte[0]);
		}
	}

	Ok(total)
}

#[cfg(test)]
mod tests {
	use async_std::task;

	use super::*;

	#[test]
	fn text_file_escapes_lone_dot_line() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let path = dir.path().join("f.txt");
			std::fs::write(&path, "hello\n.\nworld\n").unwrap();

			let mut out = Vec::new();
			send_text(&path, &mut out).await.unwrap();

			assert_eq!(
				String::from_utf8(out).unwrap(),
				"hello\r\n. \r\nworld\r\n.\r\n"
			);
		});
	}

	#[test]
	fn text_file_without_trailing_newline() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let path = dir.path().join("f.txt");
			std::fs::write(&path, "no newline at end").unwrap();

			let mut out = Vec::new();
			send_text(&path, &mut out).await.unwrap();

			assert_eq!(
				String::from_utf8(out).unwrap(),
				"no newline at end\r\n.\r\n"
			);
		});
	}

	#[test]
	fn binary_file_sent_verbatim_with_no_terminator() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let path = dir.path().join("f.bin");
			std::fs::write(&path, [0u8, 1, 2, 255, b'.']).unwrap();

			let mut out = Vec::new();
			send_binary(&path, &mut out).await.unwrap();

			assert_eq!(out, vec![0u8, 1, 2, 255, b'.']);
		});
	}

	#[test]
	fn missing_file_is_not_found() {
		task::block_on(async {
			let mut out = Vec::new();
			let err = send_text(Path::new("/no/such/file"), &mut out)
				.await
				.unwrap_err();
			assert!(matches!(err, GopherError::NotFound(_)));
		});
	}
}
