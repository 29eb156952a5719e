//! Test doubles for the loop collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};

use crate::board::{CELL_COUNT, CellLabel, Occupancy, Side};
use crate::capture::FrameSource;
use crate::classifier::CellClassifier;
use crate::geometry::{BoardRect, Point};
use crate::sync_client::{RemoteSync, ServiceReply};
use crate::tap::{TapInjector, TapOutcome};

// *************** Classification ***************

/// 64 one-pixel images whose red channel is the cell index.
pub fn indexed_cells() -> Vec<DynamicImage> {
    (0..CELL_COUNT)
        .map(|i| DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([i as u8, 0, 0]))))
        .collect()
}

fn marker(cell: &DynamicImage) -> usize {
    cell.to_rgb8().get_pixel(0, 0)[0] as usize
}

/// Reads the label a cell should get from its marker pixel.
pub struct StubClassifier {
    fail_on: Option<usize>,
}

impl StubClassifier {
    pub fn by_marker() -> Self {
        Self { fail_on: None }
    }

    pub fn failing_on(index: usize) -> Self {
        Self { fail_on: Some(index) }
    }

    pub fn expected_for(index: usize) -> CellLabel {
        match index % 3 {
            0 => CellLabel::White,
            1 => CellLabel::Black,
            _ => CellLabel::Empty,
        }
    }
}

impl CellClassifier for StubClassifier {
    fn classify(&self, cell: &DynamicImage) -> Result<CellLabel> {
        let index = marker(cell);
        if self.fail_on == Some(index) {
            bail!("stub failure on cell {}", index);
        }
        Ok(Self::expected_for(index))
    }
}

/// Labels cells by their color: near-white is White, near-black is Black.
pub struct ColorClassifier;

impl CellClassifier for ColorClassifier {
    fn classify(&self, cell: &DynamicImage) -> Result<CellLabel> {
        let px = cell.to_rgb8().get_pixel(0, 0).0;
        Ok(match px {
            [255, 255, 255] => CellLabel::White,
            [0, 0, 0] => CellLabel::Black,
            _ => CellLabel::Empty,
        })
    }
}

// *************** Frames ***************

/// Small board whose cells are painted white, black or gray from `labels`.
pub fn board_rect() -> BoardRect {
    BoardRect { left: 0, top: 0, right: 80, bottom: 80 }
}

pub fn paint_frame(labels: &[CellLabel; CELL_COUNT]) -> DynamicImage {
    let rect = board_rect();
    let mut img = RgbImage::from_pixel(rect.right, rect.bottom, Rgb([128, 128, 128]));
    for (i, label) in labels.iter().enumerate() {
        let color = match label {
            CellLabel::White => Rgb([255, 255, 255]),
            CellLabel::Black => Rgb([0, 0, 0]),
            CellLabel::Empty => continue,
        };
        let cell = rect.cell_bounds(i);
        for y in cell.y..cell.y + cell.height {
            for x in cell.x..cell.x + cell.width {
                img.put_pixel(x, y, color);
            }
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// Frame whose cell `i` is filled with red channel `i`, for `StubClassifier`.
pub fn indexed_cells_frame() -> DynamicImage {
    let rect = board_rect();
    let mut img = RgbImage::new(rect.right, rect.bottom);
    for i in 0..CELL_COUNT {
        let cell = rect.cell_bounds(i);
        for y in cell.y..cell.y + cell.height {
            for x in cell.x..cell.x + cell.width {
                img.put_pixel(x, y, Rgb([i as u8, 0, 0]));
            }
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// Standard opening layout: black on rows 0-1, white on rows 6-7.
pub fn start_position() -> [CellLabel; CELL_COUNT] {
    let mut labels = [CellLabel::Empty; CELL_COUNT];
    labels[0..16].fill(CellLabel::Black);
    labels[48..64].fill(CellLabel::White);
    labels
}

/// Hands out scripted frames; `None` entries and an exhausted script mean "no frame".
pub struct ScriptedFrames {
    frames: VecDeque<Option<DynamicImage>>,
    repeat_last: Option<DynamicImage>,
}

impl ScriptedFrames {
    pub fn new(frames: impl IntoIterator<Item = Option<DynamicImage>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            repeat_last: None,
        }
    }

    /// The same frame forever.
    pub fn constant(frame: DynamicImage) -> Self {
        Self {
            frames: VecDeque::new(),
            repeat_last: Some(frame),
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None => Ok(self.repeat_last.clone()),
        }
    }
}

// *************** Remote service ***************

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncCall {
    Begin(Side),
    Report(Occupancy),
    Fetch,
}

/// Records every call and answers from per-endpoint scripts (`Empty` once exhausted).
#[derive(Default)]
pub struct RecordingSync {
    calls: Mutex<Vec<SyncCall>>,
    begin_replies: Mutex<VecDeque<Result<ServiceReply, String>>>,
    report_replies: Mutex<VecDeque<Result<ServiceReply, String>>>,
    fetch_replies: Mutex<VecDeque<Result<ServiceReply, String>>>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_begin(self, reply: Result<ServiceReply, &str>) -> Self {
        self.begin_replies.lock().unwrap().push_back(reply.map_err(String::from));
        self
    }

    pub fn on_report(self, reply: Result<ServiceReply, &str>) -> Self {
        self.report_replies.lock().unwrap().push_back(reply.map_err(String::from));
        self
    }

    pub fn on_fetch(self, reply: Result<ServiceReply, &str>) -> Self {
        self.fetch_replies.lock().unwrap().push_back(reply.map_err(String::from));
        self
    }

    pub fn calls(&self) -> Vec<SyncCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&SyncCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn answer(
        &self,
        call: SyncCall,
        script: &Mutex<VecDeque<Result<ServiceReply, String>>>,
    ) -> Result<ServiceReply> {
        self.calls.lock().unwrap().push(call);
        match script.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(ServiceReply::Empty),
        }
    }
}

#[async_trait]
impl RemoteSync for RecordingSync {
    async fn begin_session(&self, bottom: Side) -> Result<ServiceReply> {
        self.answer(SyncCall::Begin(bottom), &self.begin_replies)
    }

    async fn report_occupancy(&self, occupancy: &Occupancy) -> Result<ServiceReply> {
        self.answer(SyncCall::Report(occupancy.clone()), &self.report_replies)
    }

    async fn fetch_move(&self) -> Result<ServiceReply> {
        self.answer(SyncCall::Fetch, &self.fetch_replies)
    }
}

// *************** Taps ***************

/// Replays scripted outcomes (`Cancelled` once exhausted) and records every tap.
pub struct ScriptedTapper {
    outcomes: Mutex<VecDeque<TapOutcome>>,
    errors_left: Mutex<usize>,
    taps: Mutex<Vec<Point>>,
}

impl ScriptedTapper {
    pub fn new(outcomes: impl IntoIterator<Item = TapOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            errors_left: Mutex::new(0),
            taps: Mutex::new(Vec::new()),
        }
    }

    pub fn always_completes() -> Self {
        Self::new([TapOutcome::Completed; 16])
    }

    /// The first `n` taps return an injector error instead of an outcome.
    pub fn failing_first(self, n: usize) -> Self {
        *self.errors_left.lock().unwrap() = n;
        self
    }

    pub fn taps(&self) -> Vec<Point> {
        self.taps.lock().unwrap().clone()
    }
}

#[async_trait]
impl TapInjector for ScriptedTapper {
    async fn tap(&self, at: Point) -> Result<TapOutcome> {
        self.taps.lock().unwrap().push(at);
        {
            let mut errors_left = self.errors_left.lock().unwrap();
            if *errors_left > 0 {
                *errors_left -= 1;
                bail!("injector unavailable");
            }
        }
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TapOutcome::Cancelled))
    }
}
