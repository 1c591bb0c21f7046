//! FFmpeg-backed frame sampler
//!
//! This module wraps the unsafe FFmpeg demux/decode calls behind the
//! `FrameSampler`/`VideoSource` traits. Milliseconds are converted to the
//! stream time base here and nowhere else.

use crate::core::frame_sampler::{resolve_path, FrameSampler, VideoSource};
use crate::models::capture::{FrameSample, PixelFormat, VideoUri};
use crate::models::pose::{PoseError, PoseResult};
use crate::platform::ContentResolver;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

// Import FFmpeg C bindings
use ffmpeg_sys_next::*;

const MILLISECONDS: AVRational = AVRational { num: 1, den: 1000 };
const SWS_BILINEAR_FLAG: c_int = 2;

/// Opens videos with libavformat/libavcodec
pub struct FfmpegFrameSampler {
    resolver: Arc<dyn ContentResolver>,
}

impl FfmpegFrameSampler {
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self { resolver }
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn open(&self, uri: &VideoUri) -> PoseResult<Box<dyn VideoSource>> {
        let path = resolve_path(uri, self.resolver.as_ref())?;
        Ok(Box::new(FfmpegVideoSource::open(&path)?))
    }
}

/// An opened video file.
///
/// Decoders are pooled: each concurrent `frame_at` call checks one out, so
/// Image-mode workers decode in parallel.
pub struct FfmpegVideoSource {
    path: PathBuf,
    duration_ms: Option<i64>,
    idle: Mutex<Vec<FfmpegDecoder>>,
    closed: AtomicBool,
}

impl FfmpegVideoSource {
    pub fn open(path: &Path) -> PoseResult<Self> {
        let decoder = FfmpegDecoder::open(path)?;
        let duration_ms = decoder.duration_ms();
        debug!("Opened {:?} (duration {:?}ms)", path, duration_ms);

        Ok(Self {
            path: path.to_path_buf(),
            duration_ms,
            idle: Mutex::new(vec![decoder]),
            closed: AtomicBool::new(false),
        })
    }

    fn checkout(&self) -> PoseResult<FfmpegDecoder> {
        if self.is_closed() {
            return Err(PoseError::DecodeFailed("video source is closed".to_string()));
        }

        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match pooled {
            Some(decoder) => Ok(decoder),
            None => FfmpegDecoder::open(&self.path)
                .map_err(|e| PoseError::DecodeFailed(e.to_string())),
        }
    }

    fn checkin(&self, decoder: FfmpegDecoder) {
        if self.is_closed() {
            return;
        }
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(decoder);
    }
}

impl VideoSource for FfmpegVideoSource {
    fn duration_ms(&self) -> PoseResult<i64> {
        self.duration_ms
            .ok_or_else(|| PoseError::DurationUnavailable(self.path.display().to_string()))
    }

    fn frame_at(&self, timestamp_ms: i64) -> PoseResult<Option<FrameSample>> {
        let mut decoder = self.checkout()?;
        let result = decoder.frame_at(timestamp_ms);
        self.checkin(decoder);
        result
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.idle.lock().unwrap_or_else(|e| e.into_inner()).clear();
            debug!("Closed {:?}", self.path);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One demuxer + decoder pair
struct FfmpegDecoder {
    format_context: *mut AVFormatContext,
    codec_context: *mut AVCodecContext,
    frame: *mut AVFrame,
    candidate: *mut AVFrame,
    packet: *mut AVPacket,
    sws_context: *mut SwsContext,
    stream_index: c_int,
    time_base: AVRational,
    start_time: i64,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    fn open(path: &Path) -> PoseResult<Self> {
        let c_path = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| {
            PoseError::OpenFailed(format!("Path contains a NUL byte: {}", path.display()))
        })?;

        // Partially built decoders are released by Drop
        let mut decoder = FfmpegDecoder {
            format_context: ptr::null_mut(),
            codec_context: ptr::null_mut(),
            frame: ptr::null_mut(),
            candidate: ptr::null_mut(),
            packet: ptr::null_mut(),
            sws_context: ptr::null_mut(),
            stream_index: -1,
            time_base: MILLISECONDS,
            start_time: 0,
        };

        unsafe {
            let ret = avformat_open_input(
                &mut decoder.format_context,
                c_path.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
            );
            if ret < 0 {
                return Err(open_failed(path, "open input", ret));
            }

            let ret = avformat_find_stream_info(decoder.format_context, ptr::null_mut());
            if ret < 0 {
                return Err(open_failed(path, "read stream info", ret));
            }

            let stream_index = av_find_best_stream(
                decoder.format_context,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                ptr::null_mut(),
                0,
            );
            if stream_index < 0 {
                return Err(open_failed(path, "find video stream", stream_index));
            }
            decoder.stream_index = stream_index;

            let stream = *(*decoder.format_context).streams.offset(stream_index as isize);
            decoder.time_base = (*stream).time_base;
            if (*stream).start_time != AV_NOPTS_VALUE {
                decoder.start_time = (*stream).start_time;
            }

            let codecpar = (*stream).codecpar;
            let codec = avcodec_find_decoder((*codecpar).codec_id);
            if codec.is_null() {
                return Err(PoseError::OpenFailed(format!(
                    "{}: no decoder for codec {:?}",
                    path.display(),
                    (*codecpar).codec_id
                )));
            }

            decoder.codec_context = avcodec_alloc_context3(codec);
            if decoder.codec_context.is_null() {
                return Err(PoseError::OpenFailed("Failed to allocate codec context".to_string()));
            }

            let ret = avcodec_parameters_to_context(decoder.codec_context, codecpar);
            if ret < 0 {
                return Err(open_failed(path, "copy codec parameters", ret));
            }

            let ret = avcodec_open2(decoder.codec_context, codec, ptr::null_mut());
            if ret < 0 {
                return Err(open_failed(path, "open codec", ret));
            }

            decoder.frame = av_frame_alloc();
            decoder.candidate = av_frame_alloc();
            decoder.packet = av_packet_alloc();
            if decoder.frame.is_null() || decoder.candidate.is_null() || decoder.packet.is_null() {
                return Err(PoseError::OpenFailed("Failed to allocate frame/packet".to_string()));
            }
        }

        Ok(decoder)
    }

    /// Container duration, falling back to the stream's own duration
    fn duration_ms(&self) -> Option<i64> {
        unsafe {
            let container = (*self.format_context).duration;
            if container != AV_NOPTS_VALUE && container > 0 {
                return Some(container / (AV_TIME_BASE as i64 / 1000));
            }

            let stream = *(*self.format_context).streams.offset(self.stream_index as isize);
            let duration = (*stream).duration;
            if duration != AV_NOPTS_VALUE && duration > 0 {
                Some(av_rescale_q(duration, self.time_base, MILLISECONDS))
            } else {
                None
            }
        }
    }

    /// Decode the last frame presented at or before `timestamp_ms`
    fn frame_at(&mut self, timestamp_ms: i64) -> PoseResult<Option<FrameSample>> {
        unsafe {
            let target = self.start_time + av_rescale_q(timestamp_ms, MILLISECONDS, self.time_base);

            let ret = av_seek_frame(
                self.format_context,
                self.stream_index,
                target,
                AVSEEK_FLAG_BACKWARD as c_int,
            );
            if ret < 0 {
                return Err(decode_failed("seek", timestamp_ms, ret));
            }
            avcodec_flush_buffers(self.codec_context);
            av_frame_unref(self.candidate);

            let mut have_candidate = false;
            let mut flushing = false;

            'decode: loop {
                if !flushing {
                    let ret = av_read_frame(self.format_context, self.packet);
                    if ret < 0 {
                        // End of stream: drain frames still buffered in the decoder
                        flushing = true;
                        avcodec_send_packet(self.codec_context, ptr::null());
                    } else {
                        if (*self.packet).stream_index != self.stream_index {
                            av_packet_unref(self.packet);
                            continue;
                        }
                        let ret = avcodec_send_packet(self.codec_context, self.packet);
                        av_packet_unref(self.packet);
                        if ret < 0 && ret != AVERROR(EAGAIN) {
                            return Err(decode_failed("send packet", timestamp_ms, ret));
                        }
                    }
                }

                loop {
                    let ret = avcodec_receive_frame(self.codec_context, self.frame);
                    if ret == AVERROR(EAGAIN) {
                        if flushing {
                            break 'decode;
                        }
                        break; // Need more packets
                    }
                    if ret == AVERROR_EOF {
                        break 'decode;
                    }
                    if ret < 0 {
                        return Err(decode_failed("receive frame", timestamp_ms, ret));
                    }

                    let step = seek_step((*self.frame).best_effort_timestamp, target);
                    if step == SeekStep::Stop {
                        av_frame_unref(self.frame);
                        break 'decode;
                    }

                    av_frame_unref(self.candidate);
                    av_frame_move_ref(self.candidate, self.frame);
                    have_candidate = true;

                    if step == SeekStep::KeepAndStop {
                        break 'decode;
                    }
                }
            }

            if !have_candidate {
                return Ok(None);
            }

            let sample = self.convert_candidate(timestamp_ms);
            av_frame_unref(self.candidate);
            sample.map(Some)
        }
    }

    /// Convert the held frame to packed RGBA
    unsafe fn convert_candidate(&mut self, timestamp_ms: i64) -> PoseResult<FrameSample> {
        let width = (*self.candidate).width;
        let height = (*self.candidate).height;
        if width <= 0 || height <= 0 {
            return Err(PoseError::DecodeFailed(format!(
                "Decoded frame has no size at {}ms",
                timestamp_ms
            )));
        }

        self.sws_context = sws_getCachedContext(
            self.sws_context,
            width,
            height,
            frame_pixel_format(self.candidate, (*self.codec_context).pix_fmt),
            width,
            height,
            AVPixelFormat::AV_PIX_FMT_RGBA,
            SWS_BILINEAR_FLAG,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null(),
        );
        if self.sws_context.is_null() {
            return Err(PoseError::DecodeFailed("Failed to initialize swscale context".to_string()));
        }

        let stride = width as usize * 4;
        let mut data = vec![0u8; stride * height as usize];
        let dst_data = [
            data.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        ];
        let dst_linesize = [stride as c_int, 0, 0, 0];

        let ret = sws_scale(
            self.sws_context,
            (*self.candidate).data.as_ptr() as *const *const u8,
            (*self.candidate).linesize.as_ptr(),
            0,
            height,
            dst_data.as_ptr(),
            dst_linesize.as_ptr(),
        );
        if ret < 0 {
            return Err(decode_failed("convert to RGBA", timestamp_ms, ret));
        }

        FrameSample::new(
            timestamp_ms,
            width as u32,
            height as u32,
            data,
            PixelFormat::RGBA8,
        )
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        unsafe {
            // Clean up resources in reverse order
            if !self.sws_context.is_null() {
                sws_freeContext(self.sws_context);
            }

            if !self.packet.is_null() {
                av_packet_free(&mut self.packet);
            }

            if !self.candidate.is_null() {
                av_frame_free(&mut self.candidate);
            }

            if !self.frame.is_null() {
                av_frame_free(&mut self.frame);
            }

            if !self.codec_context.is_null() {
                avcodec_free_context(&mut self.codec_context);
            }

            if !self.format_context.is_null() {
                avformat_close_input(&mut self.format_context);
            }
        }
    }
}

fn describe(code: c_int) -> String {
    let mut buffer = [0 as c_char; 128];
    unsafe {
        av_strerror(code, buffer.as_mut_ptr(), buffer.len());
        CStr::from_ptr(buffer.as_ptr()).to_string_lossy().into_owned()
    }
}

fn open_failed(path: &Path, step: &str, code: c_int) -> PoseError {
    PoseError::OpenFailed(format!(
        "{}: failed to {} ({})",
        path.display(),
        step,
        describe(code)
    ))
}

fn decode_failed(step: &str, timestamp_ms: i64, code: c_int) -> PoseError {
    PoseError::DecodeFailed(format!(
        "failed to {} at {}ms ({})",
        step,
        timestamp_ms,
        describe(code)
    ))
}

/// Decision for one decoded frame while looking for the last frame at or before the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekStep {
    Keep,
    KeepAndStop,
    /// Past the target. A seek that lands after the target yields no frame.
    Stop,
}

fn seek_step(pts: i64, target: i64) -> SeekStep {
    if pts == AV_NOPTS_VALUE || pts < target {
        SeekStep::Keep
    } else if pts == target {
        SeekStep::KeepAndStop
    } else {
        SeekStep::Stop
    }
}

/// Format of the decoded frame itself; streams may change format mid-way
unsafe fn frame_pixel_format(frame: *const AVFrame, fallback: AVPixelFormat) -> AVPixelFormat {
    let format = (*frame).format;
    if format < 0 || format >= AVPixelFormat::AV_PIX_FMT_NB as c_int {
        return fallback;
    }
    std::mem::transmute::<c_int, AVPixelFormat>(format)
}
