use anyhow::Context;
use std::path::Path;

/// Makes a tick that outputs every `interval` and if it ticks, it will tick immediately after
/// completion of the last tick, rather than trying to "catch up" on all the missed ticks.
///
/// If `yield_immediately` is true, the first tick completes straight away, otherwise the
/// first tick completes after `interval`.
pub fn make_periodic_tick(
	interval: std::time::Duration,
	yield_immediately: bool,
) -> tokio::time::Interval {
	let mut interval = tokio::time::interval_at(
		tokio::time::Instant::now() +
			if yield_immediately { std::time::Duration::ZERO } else { interval },
		interval,
	);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	interval
}

/// Reads a hex string from a file, stripping surrounding whitespace and an optional `0x` prefix
/// before handing it to `t` to decode. The context string names the secret for error messages
/// without ever echoing the file contents.
pub fn read_clean_and_decode_hex_str_file<V, T: FnOnce(&str) -> Result<V, anyhow::Error>>(
	file: &Path,
	context: &str,
	t: T,
) -> Result<V, anyhow::Error> {
	std::fs::read_to_string(file)
		.with_context(|| format!("Failed to read {context} file at {}", file.display()))
		.and_then(|string| {
			let mut str = string.as_str();
			str = str.trim();
			str = str.trim_matches(|c| c == '"' || c == '\'');
			if let Some(stripped) = str.strip_prefix("0x") {
				str = stripped;
			}
			// Note: `t` may fail at decoding, so we need to pass in the context to ensure the
			// error message is meaningful
			t(str).with_context(|| format!("Failed to decode {context} from file at {}", file.display()))
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[tokio::test]
	async fn make_periodic_tick_test() {
		tokio::time::pause();

		let mut tick = make_periodic_tick(std::time::Duration::from_secs(10), false);

		// First tick only completes after the interval has elapsed.
		tokio::time::advance(std::time::Duration::from_secs(9)).await;
		assert!(futures::poll!(Box::pin(tick.tick())).is_pending());
		tokio::time::advance(std::time::Duration::from_secs(2)).await;
		tick.tick().await;

		// Later ticks complete at the interval.
		tokio::time::advance(std::time::Duration::from_secs(11)).await;
		tick.tick().await;
	}

	#[tokio::test]
	async fn make_periodic_tick_yields_immediately() {
		tokio::time::pause();
		let mut tick = make_periodic_tick(std::time::Duration::from_secs(10), true);
		tick.tick().await;
	}

	#[test]
	fn test_read_clean_and_decode_hex_str_file() {
		let temp_dir = tempfile::TempDir::new().unwrap();

		let write_file = |contents: &str| {
			let path = temp_dir.path().join("file");
			let mut file = std::fs::File::create(&path).unwrap();
			file.write_all(contents.as_bytes()).unwrap();
			path
		};

		let path = write_file("   0xdeadbeef\n");
		assert_eq!(
			read_clean_and_decode_hex_str_file(&path, "test key", |str| {
				hex::decode(str).map_err(anyhow::Error::new)
			})
			.unwrap(),
			vec![0xde, 0xad, 0xbe, 0xef]
		);

		let path = write_file("deadbeef");
		assert_eq!(
			read_clean_and_decode_hex_str_file(&path, "test key", |str| {
				hex::decode(str).map_err(anyhow::Error::new)
			})
			.unwrap(),
			vec![0xde, 0xad, 0xbe, 0xef]
		);

		let path = write_file("not hex");
		assert!(read_clean_and_decode_hex_str_file(&path, "test key", |str| {
			hex::decode(str).map_err(anyhow::Error::new)
		})
		.is_err());

		assert!(read_clean_and_decode_hex_str_file(
			&temp_dir.path().join("missing"),
			"test key",
			|str| hex::decode(str).map_err(anyhow::Error::new)
		)
		.is_err());
	}
}
