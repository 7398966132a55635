//! RTSP endpoint re-exposing the relayed stream via an appsrc pipeline

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_rtsp_server::prelude::*;
use gstreamer_rtsp_server::{RTSPMedia, RTSPMediaFactory, RTSPServer};
use gstreamer_video as gst_video;
use tracing::{info, warn};

use crate::restream::PullFrameSource;
use crate::{OutputConfig, StreamConfig};

/// RTSP server wrapping the pull frame source.
///
/// The media pipeline starts at an appsrc whose need-data signal drives
/// `PullFrameSource::pull`; geometry and frame rate are negotiated once
/// from the stream configuration.
pub struct RtspRestream {
    server: RTSPServer,
    url: String,
}

impl RtspRestream {
    pub fn new(
        output: &OutputConfig,
        stream: &StreamConfig,
        source: Arc<PullFrameSource>,
    ) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        let launch = Self::build_launch_string();
        info!("Restream pipeline: {launch}");

        let stream = stream.clone();
        let factory = RTSPMediaFactory::new();
        factory.set_launch(&launch);
        factory.set_shared(true);
        factory.connect_media_configure(move |_, media| {
            configure_media(media, &stream, Arc::clone(&source));
        });

        let server = RTSPServer::new();
        server.set_address(&output.address);
        server.set_service(&output.port.to_string());
        server
            .mount_points()
            .ok_or_else(|| eyre!("RTSP server has no mount points"))?
            .add_factory(&output.path, factory);

        // Loopback in the advertised url when bound to all interfaces.
        let host = if output.address == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &output.address
        };
        let url = format!("rtsp://{}:{}{}", host, output.port, output.path);

        Ok(Self { server, url })
    }

    /// Encoder chain after the appsrc; caps are set programmatically on
    /// the appsrc during media configuration.
    fn build_launch_string() -> String {
        "( appsrc name=source is-live=true block=true format=GST_FORMAT_TIME ! \
         videoconvert ! video/x-raw,format=I420 ! \
         x264enc speed-preset=ultrafast tune=zerolatency ! \
         rtph264pay config-interval=1 name=pay0 pt=96 )"
            .to_string()
    }

    /// Attach the server and serve until the process is terminated.
    pub fn run(&self) -> Result<()> {
        self.server
            .attach(None)
            .map_err(|e| eyre!("Failed to attach RTSP server: {}", e))?;
        info!("restream available at {}", self.url);

        let main_loop = glib::MainLoop::new(None, false);
        main_loop.run();
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Wire the media's appsrc to the pull frame source.
fn configure_media(media: &RTSPMedia, stream: &StreamConfig, source: Arc<PullFrameSource>) {
    let Some(element) = media.element() else {
        warn!("configured media has no pipeline element");
        return;
    };
    let Ok(bin) = element.downcast::<gst::Bin>() else {
        warn!("media element is not a bin");
        return;
    };
    let Some(appsrc) = bin.by_name("source") else {
        warn!("appsrc 'source' missing from media pipeline");
        return;
    };
    let Ok(appsrc) = appsrc.downcast::<gst_app::AppSrc>() else {
        warn!("element 'source' is not an appsrc");
        return;
    };

    match video_caps(stream) {
        Ok(caps) => appsrc.set_caps(Some(&caps)),
        Err(err) => {
            warn!("failed to build stream caps: {err}");
            return;
        }
    }

    appsrc.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |appsrc, _length| push_frame(appsrc, &source))
            .build(),
    );
}

fn video_caps(stream: &StreamConfig) -> Result<gst::Caps> {
    let info = gst_video::VideoInfo::builder(
        gst_video::VideoFormat::Rgb,
        stream.width,
        stream.height,
    )
    .fps(gst::Fraction::new(stream.fps as i32, 1))
    .build()
    .map_err(|e| eyre!("invalid video info: {}", e))?;
    info.to_caps().map_err(|e| eyre!("invalid caps: {}", e))
}

/// need-data handler: one pull per request, timestamped by the source.
fn push_frame(appsrc: &gst_app::AppSrc, source: &PullFrameSource) {
    let pulled = source.pull();

    let mut buffer = gst::Buffer::from_mut_slice(pulled.data.as_ref().clone());
    if let Some(buffer_ref) = buffer.get_mut() {
        buffer_ref.set_pts(gst::ClockTime::from_nseconds(pulled.pts.as_nanos() as u64));
        buffer_ref.set_dts(gst::ClockTime::from_nseconds(pulled.dts.as_nanos() as u64));
        buffer_ref.set_duration(gst::ClockTime::from_nseconds(
            pulled.duration.as_nanos() as u64
        ));
    }

    if let Err(err) = appsrc.push_buffer(buffer) {
        warn!("push-buffer rejected: {err:?}");
    }
}
