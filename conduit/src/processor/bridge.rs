use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use super::routine::ResultFrameType;
use crate::error::panic_message;
use crate::fps::FrameRateCounter;

/// Image buffer handed back by the routine, RGBA8 rows top row first.
#[derive(Debug, Clone, Copy)]
pub struct ResultFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

/// Receives processing results. Called from the routine's threads, never
/// from the control thread.
///
/// Errors and panics are logged and swallowed by the caller.
pub trait FrameObserver: Send + Sync + 'static {
    fn on_frame(&self, frame: ResultFrame<'_>) -> anyhow::Result<()>;

    fn on_result(&self, frame_type: ResultFrameType, values: Option<&[f32]>) -> anyhow::Result<()>;
}

pub(crate) struct ResultBridge {
    observer: Arc<dyn FrameObserver>,
    fps: Arc<Mutex<FrameRateCounter>>,
}

impl ResultBridge {
    pub fn new(observer: Arc<dyn FrameObserver>, fps: Arc<Mutex<FrameRateCounter>>) -> Self {
        Self { observer, fps }
    }

    fn dispatch(&self, frame_type: ResultFrameType, frame: Option<ResultFrame<'_>>, values: Option<&[f32]>) {
        self.fps.lock().count();

        forward("on_result", || self.observer.on_result(frame_type, values));
        if let Some(frame) = frame {
            forward("on_frame", || self.observer.on_frame(frame));
        }
    }
}

fn forward(callback: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("Observer {} failed: {:#}", callback, err),
        Err(panic) => warn!("Observer {} panicked: {}", callback, panic_message(panic.as_ref())),
    }
}

/// Routine-side endpoint of the result path.
///
/// Holds only a weak reference to the processor, so a routine that keeps
/// delivering after the processor was released reaches nobody.
#[derive(Clone)]
pub struct ResultSink {
    bridge: Weak<ResultBridge>,
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ResultSink {
    pub(crate) fn new(bridge: &Arc<ResultBridge>) -> Self {
        Self {
            bridge: Arc::downgrade(bridge),
        }
    }

    /// A sink that is not connected to any processor.
    pub fn detached() -> Self {
        Self { bridge: Weak::new() }
    }

    /// Forwards one result. Returns `false` if the processor is gone.
    pub fn deliver(
        &self,
        frame_type: ResultFrameType,
        frame: Option<ResultFrame<'_>>,
        values: Option<&[f32]>,
    ) -> bool {
        match self.bridge.upgrade() {
            Some(bridge) => {
                bridge.dispatch(frame_type, frame, values);
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.bridge.strong_count() > 0
    }
}

/// Owned copy of one observer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Image {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    Vector {
        frame_type: ResultFrameType,
        values: Vec<f32>,
    },
}

/// Observer that forwards results into a tokio channel for async consumers.
#[derive(Debug, Clone)]
pub struct ResultChannel {
    tx: UnboundedSender<ResultPayload>,
}

impl ResultChannel {
    pub fn new() -> (Self, UnboundedReceiver<ResultPayload>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameObserver for ResultChannel {
    fn on_frame(&self, frame: ResultFrame<'_>) -> anyhow::Result<()> {
        self.tx.send(ResultPayload::Image {
            width: frame.width,
            height: frame.height,
            pixels: frame.pixels.to_vec(),
        })?;
        Ok(())
    }

    fn on_result(&self, frame_type: ResultFrameType, values: Option<&[f32]>) -> anyhow::Result<()> {
        let Some(values) = values else {
            return Ok(());
        };
        self.tx.send(ResultPayload::Vector {
            frame_type,
            values: values.to_vec(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FrameObserver for Recorder {
        fn on_frame(&self, frame: ResultFrame<'_>) -> anyhow::Result<()> {
            self.calls.lock().push(format!("frame {}x{}", frame.width, frame.height));
            if self.fail {
                panic!("observer panicked in on_frame");
            }
            Ok(())
        }

        fn on_result(&self, frame_type: ResultFrameType, values: Option<&[f32]>) -> anyhow::Result<()> {
            self.calls
                .lock()
                .push(format!("result {} {:?}", frame_type, values.map(<[f32]>::len)));
            if self.fail {
                return Err(anyhow!("observer rejected result"));
            }
            Ok(())
        }
    }

    fn bridge(recorder: &Arc<Recorder>) -> (Arc<ResultBridge>, Arc<Mutex<FrameRateCounter>>) {
        let fps = Arc::new(Mutex::new(FrameRateCounter::new()));
        let bridge = Arc::new(ResultBridge::new(recorder.clone(), fps.clone()));
        (bridge, fps)
    }

    #[test]
    fn result_is_forwarded_before_frame() {
        let recorder = Arc::new(Recorder::default());
        let (bridge, fps) = bridge(&recorder);
        let sink = ResultSink::new(&bridge);

        let pixels = [0u8; 8];
        let frame = ResultFrame {
            width: 2,
            height: 1,
            pixels: &pixels,
        };
        assert!(sink.deliver(ResultFrameType::Dst, Some(frame), Some(&[1.0, 2.0])));
        assert!(sink.deliver(ResultFrameType::Src, None, None));

        assert_eq!(
            *recorder.calls.lock(),
            vec!["result Dst Some(2)", "frame 2x1", "result Src None"]
        );
        assert_eq!(fps.lock().total_frames(), 2);
    }

    #[test]
    fn observer_failures_are_contained() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (bridge, _fps) = bridge(&recorder);
        let sink = ResultSink::new(&bridge);

        let frame = ResultFrame {
            width: 0,
            height: 0,
            pixels: &[],
        };
        assert!(sink.deliver(ResultFrameType::Dst, Some(frame), Some(&[])));
        assert_eq!(recorder.calls.lock().len(), 2);
    }

    #[test]
    fn sink_is_inert_after_bridge_drop() {
        let recorder = Arc::new(Recorder::default());
        let (bridge, _fps) = bridge(&recorder);
        let sink = ResultSink::new(&bridge);
        drop(bridge);

        assert!(!sink.is_alive());
        assert!(!sink.deliver(ResultFrameType::Dst, None, Some(&[1.0])));
        assert!(recorder.calls.lock().is_empty());
        assert!(!ResultSink::detached().is_alive());
    }

    #[tokio::test]
    async fn channel_receives_owned_payloads() {
        let (channel, mut rx) = ResultChannel::new();
        let recorder: Arc<dyn FrameObserver> = Arc::new(channel);
        let fps = Arc::new(Mutex::new(FrameRateCounter::new()));
        let bridge = Arc::new(ResultBridge::new(recorder, fps));
        let sink = ResultSink::new(&bridge);

        let pixels = [7u8; 4];
        sink.deliver(
            ResultFrameType::SrcWithOverlay,
            Some(ResultFrame {
                width: 1,
                height: 1,
                pixels: &pixels,
            }),
            Some(&[0.5]),
        );

        assert_eq!(
            rx.recv().await,
            Some(ResultPayload::Vector {
                frame_type: ResultFrameType::SrcWithOverlay,
                values: vec![0.5],
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ResultPayload::Image {
                width: 1,
                height: 1,
                pixels: vec![7; 4],
            })
        );
    }
}
