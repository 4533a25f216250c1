//! Gears demo viewer.
//!
//! Renders three animated gears with a single device-generated draw
//! sequence per frame. Each gear selects its own shader variant through
//! an indirect execution set.
//!
//! ## Options
//!
//! - `-samples <N>`: MSAA sample count (1, 2, 4, 8, 16, 32, or 64)
//! - `-present-mailbox`: Prefer mailbox presentation
//! - `-present-immediate`: Prefer immediate presentation
//! - `-size <WxH>`: Initial window size (default: 300x300)
//! - `-fullscreen`: Run borderless fullscreen
//! - `-shader-object`: Use shader objects instead of pipelines
//! - `-info`: Log device properties at startup
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::process::ExitCode;

use ash::vk;
use gearvk_app::{run, sample_count_from_u32, AppConfig};

/// Parsed command line options, kept toolkit-agnostic for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    samples: u32,
    width: u32,
    height: u32,
    present: PresentPreference,
    fullscreen: bool,
    print_info: bool,
    use_shader_objects: bool,
    help: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresentPreference {
    Fifo,
    Mailbox,
    Immediate,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            samples: 1,
            width: 300,
            height: 300,
            present: PresentPreference::Fifo,
            fullscreen: false,
            print_info: false,
            use_shader_objects: false,
            help: false,
        }
    }
}

/// Parse command line arguments (excluding the program name).
fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-samples" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "-samples requires a value".to_string())?;
                let samples: u32 = value
                    .parse()
                    .map_err(|_| format!("invalid sample count: {value}"))?;
                if sample_count_from_u32(samples).is_none() {
                    return Err(format!("invalid sample count: {samples}"));
                }
                options.samples = samples;
                i += 1;
            }
            "-size" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "-size requires a value".to_string())?;
                let (width, height) = parse_size(value)?;
                options.width = width;
                options.height = height;
                i += 1;
            }
            "-present-mailbox" => options.present = PresentPreference::Mailbox,
            "-present-immediate" => options.present = PresentPreference::Immediate,
            "-fullscreen" => options.fullscreen = true,
            "-info" => options.print_info = true,
            "-shader-object" => options.use_shader_objects = true,
            "-h" | "--help" => options.help = true,
            other => return Err(format!("unknown option: {other}")),
        }
        i += 1;
    }

    Ok(options)
}

/// Parse a `WxH` window size.
fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let error = || format!("invalid size (expected WxH): {value}");

    let (width, height) = value.split_once('x').ok_or_else(error)?;
    let width: u32 = width.parse().map_err(|_| error())?;
    let height: u32 = height.parse().map_err(|_| error())?;
    if width == 0 || height == 0 {
        return Err(error());
    }

    Ok((width, height))
}

fn print_usage() {
    eprintln!(
        "Animated gears rendered through device-generated commands

USAGE:
    gearvk-viewer [OPTIONS]

OPTIONS:
    -samples <N>         MSAA sample count (1, 2, 4, 8, 16, 32, or 64)
    -present-mailbox     Prefer mailbox presentation
    -present-immediate   Prefer immediate presentation
    -size <WxH>          Initial window size (default: 300x300)
    -fullscreen          Run borderless fullscreen
    -shader-object       Use shader objects instead of pipelines
    -info                Log device properties at startup
    -h, --help           Print this help message"
    );
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {e}\n");
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    if options.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let samples = sample_count_from_u32(options.samples)
        .unwrap_or(vk::SampleCountFlags::TYPE_1);
    let present_mode = match options.present {
        PresentPreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentPreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentPreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };

    let config = AppConfig {
        title: "gearvk".to_string(),
        width: options.width,
        height: options.height,
        samples,
        present_mode,
        fullscreen: options.fullscreen,
        print_device_info: options.print_info,
        use_shader_objects: options.use_shader_objects,
        ..Default::default()
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn no_args_gives_defaults() {
        let options = parse_args(&[]).unwrap();
        assert_eq!(options, CliOptions::default());
    }

    #[test]
    fn samples_and_size_parse() {
        let options = parse_args(&args(&["-samples", "4", "-size", "800x600"])).unwrap();
        assert_eq!(options.samples, 4);
        assert_eq!((options.width, options.height), (800, 600));
    }

    #[test]
    fn flags_parse() {
        let options = parse_args(&args(&[
            "-present-mailbox",
            "-fullscreen",
            "-info",
            "-shader-object",
        ]))
        .unwrap();
        assert_eq!(options.present, PresentPreference::Mailbox);
        assert!(options.fullscreen);
        assert!(options.print_info);
        assert!(options.use_shader_objects);
    }

    #[test]
    fn last_present_flag_wins() {
        let options =
            parse_args(&args(&["-present-mailbox", "-present-immediate"])).unwrap();
        assert_eq!(options.present, PresentPreference::Immediate);
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(parse_args(&args(&["-bogus"])).is_err());
    }

    #[test]
    fn invalid_sample_count_is_rejected() {
        assert!(parse_args(&args(&["-samples", "3"])).is_err());
        assert!(parse_args(&args(&["-samples"])).is_err());
    }

    #[test]
    fn malformed_size_is_rejected() {
        assert!(parse_args(&args(&["-size", "800"])).is_err());
        assert!(parse_args(&args(&["-size", "0x600"])).is_err());
        assert!(parse_args(&args(&["-size", "axb"])).is_err());
    }

    #[test]
    fn help_flags_parse() {
        assert!(parse_args(&args(&["-h"])).unwrap().help);
        assert!(parse_args(&args(&["--help"])).unwrap().help);
    }
}
