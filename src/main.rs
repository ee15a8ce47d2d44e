//! Capture tool: opens one camera through the vendor SDK, applies the
//! configuration given on the command line and logs every frame.

mod args;

use std::time::Duration;

use args::Args;
use bufccd_capture::traits::{CameraId, Result};
use bufccd_capture::{logger, Camera, CameraError, FrameEvent, HostContext, SdkEngine};
use tracing::{error, info};

fn main() {
    let args = Args::load();
    logger::init(args.verbose);

    if let Err(err) = run(&args) {
        error!(%err, "capture failed");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let engine = match &args.sdk {
        Some(path) => SdkEngine::load(path)?,
        None => SdkEngine::load_default()?,
    };
    let mut camera = Camera::new(engine);

    let count = camera.init_device()?;
    info!(cameras = count, "cameras found");
    let id = CameraId::new(args.camera)
        .ok_or_else(|| CameraError::ValidationFailure {
            parameter: "camera",
            reason: "camera numbers start at 1".to_owned(),
        })?;
    let identity = camera.query_identity(id)?;
    info!(
        %id,
        module = %identity.module_no,
        serial = %identity.serial_no,
        "camera identity"
    );
    camera.add_to_working_set(id)?;

    camera.start_engine(HostContext::default(), args.bits())?;
    camera.set_work_mode(args.work_mode.into())?;
    camera.set_resolution(args.resolution.into(), args.bin.into())?;
    let (x_start, y_start) = args.roi();
    camera.set_roi(x_start, y_start)?;
    camera.set_exposure_ms(args.exposure_ms)?;
    camera.set_gains(args.gains())?;
    camera.set_tone(args.tone())?;
    camera.set_display_mode(args.display())?;
    camera.set_frame_type(args.frame_type.into())?;
    camera.install_fault_callback()?;

    camera.set_frame_consumer(|event: &FrameEvent<'_>| {
        info!(
            camera = event.metadata.camera_id,
            rows = event.metadata.rows,
            columns = event.metadata.columns,
            exposure_us = event.metadata.exposure_us(),
            timestamp = event.metadata.timestamp,
            average = event.average,
            "frame"
        );
    });

    camera.start_grab(args.grab_count())?;
    if args.factory_panel {
        camera.show_factory_panel()?;
    }

    std::thread::sleep(Duration::from_secs(args.duration));
    if args.factory_panel {
        camera.hide_factory_panel()?;
    }

    let stats = camera.dispatch_stats();
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        "grab finished"
    );
    camera.shutdown()
}
