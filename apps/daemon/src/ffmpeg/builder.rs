use crate::store::{StreamConfig, StreamId};

/// How the encoder binary is invoked. `prefix_args` come before the
/// generated arguments, which lets a wrapper script stand in for ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl EncoderCommand {
    /// Parses a whitespace-separated command line such as `ffmpeg` or
    /// `/bin/sh fake-ffmpeg.sh`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(String::from);
        let program = words.next()?;
        Some(Self {
            program,
            prefix_args: words.collect(),
        })
    }
}

impl Default for EncoderCommand {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            prefix_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub output_url: String,
}

impl Invocation {
    /// Single-line rendering for log messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds the relay invocation for a stream. Same input, same output.
pub fn build_ffmpeg_args(id: StreamId, config: &StreamConfig, encoder: &EncoderCommand) -> Invocation {
    let output_url = config.output_url(id);
    let input = config.input.trim();

    let mut args: Vec<String> = encoder.prefix_args.clone();

    // global
    args.extend(["-hide_banner", "-y"].map(String::from));

    // input
    if input.starts_with("rtsp://") {
        args.extend(["-rtsp_transport", "tcp"].map(String::from));
    }
    args.extend(["-i".to_string(), input.to_string()]);

    // encoding
    args.extend(["-c:v".to_string(), config.codec.encoder_name().to_string()]);

    if !config.codec.is_copy() {
        if let Some(bitrate) = config.bitrate {
            args.extend(["-b:v".to_string(), format!("{}k", bitrate)]);
        }
        if let Some(fps) = config.fps {
            args.extend(["-r".to_string(), fps.to_string()]);
        }
    }

    // output
    args.extend(["-f", "rtsp", "-rtsp_transport", "tcp"].map(String::from));
    args.push(output_url.clone());

    Invocation {
        program: encoder.program.clone(),
        args,
        output_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Codec;

    fn config(codec: Codec) -> StreamConfig {
        StreamConfig {
            input: "/dev/video0".to_string(),
            destination: "rtsp://host:8554".to_string(),
            codec,
            bitrate: Some(4000),
            fps: Some(25),
            stream_name: "cam1".to_string(),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn copy_relay_skips_rate_flags() {
        let invocation = build_ffmpeg_args(1, &config(Codec::Copy), &EncoderCommand::default());

        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(invocation.output_url, "rtsp://host:8554/cam1");
        assert_eq!(invocation.args.last().map(String::as_str), Some("rtsp://host:8554/cam1"));
        assert!(has_pair(&invocation.args, "-c:v", "copy"));
        assert!(has_pair(&invocation.args, "-i", "/dev/video0"));
        assert!(!invocation.args.iter().any(|a| a == "-b:v" || a == "-r"));
    }

    #[test]
    fn transcode_adds_bitrate_and_rate() {
        let invocation = build_ffmpeg_args(1, &config(Codec::Hevc), &EncoderCommand::default());

        assert!(has_pair(&invocation.args, "-c:v", "hevc_nvenc"));
        assert!(has_pair(&invocation.args, "-b:v", "4000k"));
        assert!(has_pair(&invocation.args, "-r", "25"));
    }

    #[test]
    fn transcode_without_optional_fields() {
        let mut cfg = config(Codec::H264);
        cfg.bitrate = None;
        cfg.fps = None;

        let invocation = build_ffmpeg_args(1, &cfg, &EncoderCommand::default());
        assert!(has_pair(&invocation.args, "-c:v", "h264_nvenc"));
        assert!(!invocation.args.iter().any(|a| a == "-b:v" || a == "-r"));
    }

    #[test]
    fn rtsp_input_uses_tcp_transport() {
        let mut cfg = config(Codec::Copy);
        cfg.input = "rtsp://camera.local/live".to_string();

        let invocation = build_ffmpeg_args(1, &cfg, &EncoderCommand::default());
        let input_at = invocation.args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(invocation.args[input_at - 2], "-rtsp_transport");
        assert_eq!(invocation.args[input_at - 1], "tcp");
    }

    #[test]
    fn local_input_has_no_input_transport() {
        let invocation = build_ffmpeg_args(1, &config(Codec::Copy), &EncoderCommand::default());
        let input_at = invocation.args.iter().position(|a| a == "-i").unwrap();
        assert!(!invocation.args[..input_at].iter().any(|a| a == "-rtsp_transport"));
    }

    #[test]
    fn unset_name_falls_back_to_id() {
        let mut cfg = config(Codec::Copy);
        cfg.stream_name = String::new();
        cfg.destination = "rtsp://host:8554/".to_string();

        let invocation = build_ffmpeg_args(42, &cfg, &EncoderCommand::default());
        assert_eq!(invocation.output_url, "rtsp://host:8554/stream_42");
    }

    #[test]
    fn construction_is_deterministic() {
        let cfg = config(Codec::H264);
        let encoder = EncoderCommand::default();

        assert_eq!(build_ffmpeg_args(3, &cfg, &encoder), build_ffmpeg_args(3, &cfg, &encoder));
    }

    #[test]
    fn prefix_args_come_first() {
        let encoder = EncoderCommand::parse("/bin/sh  wrapper.sh").unwrap();
        let invocation = build_ffmpeg_args(1, &config(Codec::Copy), &encoder);

        assert_eq!(invocation.program, "/bin/sh");
        assert_eq!(invocation.args[0], "wrapper.sh");
        assert_eq!(invocation.args[1], "-hide_banner");
    }

    #[test]
    fn empty_encoder_command_is_rejected() {
        assert_eq!(EncoderCommand::parse("   "), None);
    }
}
