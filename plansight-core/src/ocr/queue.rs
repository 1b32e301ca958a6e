//! Serializing non-thread-safe OCR engines behind a single worker.

use image::GrayImage;

use super::{OcrEngine, OcrError, OcrRead};

/// An OCR engine that requires exclusive access (most C-backed engines do).
///
/// Implementations never leave the worker thread they are constructed on,
/// so they need neither `Send` nor `Sync`.
pub trait BlockingOcr {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognizes text; may mutate internal engine state.
    fn recognize(&mut self, image: &GrayImage) -> Result<OcrRead, OcrError>;
}

type Job = (GrayImage, flume::Sender<Result<OcrRead, OcrError>>);

/// Runs a [`BlockingOcr`] engine on a dedicated worker thread.
///
/// The engine is constructed by the factory on the worker itself and never
/// crosses threads. Concurrent callers enqueue jobs and block on their
/// reply; the engine only ever sees one request at a time. Dropping the
/// queue closes the channel and lets the worker exit.
pub struct SerialOcr {
    name: String,
    jobs: flume::Sender<Job>,
}

impl std::fmt::Debug for SerialOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialOcr").field("name", &self.name).finish()
    }
}

impl SerialOcr {
    /// Spawns the worker and constructs the engine on it.
    ///
    /// Initialization failures are reported synchronously; the worker exits
    /// and no queue handle is returned.
    pub fn spawn<E, F>(name: &str, factory: F) -> Result<Self, OcrError>
    where
        E: BlockingOcr,
        F: FnOnce() -> Result<E, OcrError> + Send + 'static,
    {
        let (jobs, receiver) = flume::unbounded::<Job>();
        let (init_tx, init_rx) = flume::bounded::<Result<(), OcrError>>(1);

        let spawned = std::thread::Builder::new()
            .name("ocr-worker".into())
            .spawn(move || {
                let mut engine = match factory() {
                    Ok(engine) => {
                        let _ = init_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok((image, reply)) = receiver.recv() {
                    let result = engine.recognize(&image);
                    // receiver gone means the caller gave up; keep serving
                    let _ = reply.send(result);
                }
            });
        if let Err(e) = spawned {
            return Err(OcrError::EngineInit(format!("couldn't spawn worker: {e}")));
        }
        init_rx.recv().map_err(|_| OcrError::WorkerGone)??;

        Ok(Self {
            name: format!("serial({name})"),
            jobs,
        })
    }
}

impl OcrEngine for SerialOcr {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, image: &GrayImage) -> Result<OcrRead, OcrError> {
        let (reply, response) = flume::bounded(1);
        self.jobs
            .send((image.clone(), reply))
            .map_err(|_| OcrError::WorkerGone)?;
        response.recv().map_err(|_| OcrError::WorkerGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine that counts invocations to prove serialization works.
    struct CountingOcr {
        calls: usize,
    }

    impl BlockingOcr for CountingOcr {
        fn name(&self) -> &str {
            "counting"
        }

        fn recognize(&mut self, _image: &GrayImage) -> Result<OcrRead, OcrError> {
            self.calls += 1;
            Ok(OcrRead {
                text: format!("call-{}", self.calls),
                confidence: 0.9,
            })
        }
    }

    #[test]
    fn serializes_concurrent_calls() {
        let queue = SerialOcr::spawn("counting", || Ok(CountingOcr { calls: 0 })).unwrap();
        let queue = std::sync::Arc::new(queue);
        let img = GrayImage::new(4, 4);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = std::sync::Arc::clone(&queue);
                let img = img.clone();
                std::thread::spawn(move || queue.recognize(&img).unwrap())
            })
            .collect();

        let mut texts: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().text)
            .collect();
        texts.sort();
        texts.dedup();
        // every call saw a distinct engine state: one at a time
        assert_eq!(texts.len(), 8);
    }

    #[test]
    fn init_failure_surfaces_synchronously() {
        struct Never;
        impl BlockingOcr for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn recognize(&mut self, _image: &GrayImage) -> Result<OcrRead, OcrError> {
                Err(OcrError::Recognition("unreachable".into()))
            }
        }

        let result = SerialOcr::spawn::<Never, _>("never", || {
            Err(OcrError::EngineInit("missing traineddata".into()))
        });
        assert!(matches!(result, Err(OcrError::EngineInit(_))));
    }
}
