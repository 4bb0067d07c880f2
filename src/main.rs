use image::error::ImageError;

use tonetree::{pack_rgb, ToneError, ToneExtractor};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Helper function for `main`.
fn error_exit(msg: &str, code: i32) -> ! {
	eprintln!("{}", msg);
	std::process::exit(code)
}

/// `clap`-based CLI printing the weighted dominant colors of an image.
///
/// May exit process with status code if there are errors:
///
/// 1: `clap` error
///
/// 2: invalid arguments
///
/// 3: file I/O issues
///
/// 4: invalid image data
///
/// 5: computation limits exceeded
///
/// 10: other, potentially unknown error
fn main() {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "tonetree=warn".into()),
		)
		.with(tracing_subscriber::fmt::layer().without_time())
		.init();

	let clap_matches = clap::App::new("tonetree")
		.version("0.1.0")
		.author("vkcz")
		.about("Lists the dominant colors of an image, weighted by pixel count.")
		.arg_from_usage("-c, --count=[N] 'Maximum number of colors to list; defaults to 8'")
		.arg_from_usage("-n, --no-downsample 'Always analyze the image at full resolution'")
		.arg_from_usage("--threshold=[N] 'Pixel count above which a downsampled copy is analyzed; defaults to 262144'")
		.arg_from_usage("--target=[N] 'Approximate pixel count of the downsampled copy; defaults to 65536'")
		.arg_from_usage("<INPUT> 'Path to input image'")
		.get_matches();

	let count = match clap_matches.value_of("count").unwrap_or("8").parse::<usize>() {
		Ok(n) => n,
		Err(_) => error_exit("Non-numeric value for count", 2)
	};
	let mut extractor = ToneExtractor::new(count, !clap_matches.is_present("no-downsample"));
	if let Some(t) = clap_matches.value_of("threshold") {
		match t.parse() {
			Ok(n) => extractor = extractor.with_downsample_threshold(n),
			Err(_) => error_exit("Non-numeric value for threshold", 2)
		}
	}
	if let Some(t) = clap_matches.value_of("target") {
		match t.parse() {
			Ok(n) => extractor = extractor.with_downsample_target(n),
			Err(_) => error_exit("Non-numeric value for target", 2)
		}
	}

	let input_path = match clap_matches.value_of("INPUT") {
		Some(p) => p,
		None => error_exit("Missing input path", 2)
	};
	let source = match image::open(input_path) {
		Ok(i) => i,
		Err(e) => {
			let (msg, code) = match e {
				ImageError::Decoding(_) => ("Invalid image data", 4),
				ImageError::Limits(_) => ("Computation limits exceeded", 5),
				ImageError::IoError(_) => ("File not found or could not be read", 3),
				_ => ("An error occurred", 10)
			};
			error_exit(msg, code)
		}
	};

	let colors = match extractor.get_weighted_colors(&source) {
		Ok(c) => c,
		Err(e) => {
			let code = match e {
				ToneError::InvalidArgument(_) => 2,
				ToneError::UnsupportedFormat(_) => 4,
				ToneError::ResourceAcquisition(_) => 10,
			};
			error_exit(&e.to_string(), code)
		}
	};
	let total = colors.iter().map(|wc| wc.weight).sum::<u64>().max(1);
	for wc in &colors {
		println!(
			"#{:06x}\t{}\t{:.2}%",
			pack_rgb(&wc.color),
			wc.weight,
			wc.weight as f64 * 100. / total as f64
		);
	}
}
