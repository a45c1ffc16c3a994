//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a file into RGB24 frames in decode
//! order. The decoder is flushed at end of file so trailing frames are not
//! lost.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::file::VideoInfo;

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
    frame_count: u64,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path))?;
        let stream_index = input_stream.index();
        let fps = f64::from(input_stream.avg_frame_rate());
        let frames = input_stream.frames();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps: if fps.is_finite() && fps > 0.0 { fps } else { 25.0 },
            frame_count: u64::try_from(frames).ok().filter(|n| *n > 0),
        };

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            frame_count: 0,
            flushed: false,
        })
    }

    pub(crate) fn info(&self) -> VideoInfo {
        self.info.clone()
    }

    pub(crate) fn frames_decoded(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            if let Some(image) = self.receive_rgb()? {
                self.frame_count += 1;
                return Ok(Some(image));
            }
            if self.flushed {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    fn receive_rgb(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        frame_to_image(&rgb_frame).map(Some)
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("decoded frame buffer does not match {}x{}", width, height))
}
