// demos.rs — CPU demo pipelines driven by the demo harness
//
// Four simulation families, each with `init`, `update` and `render` entry
// points. State is a 3-D `(x, y, channel)` buffer; the render target is a
// 2-D int32 buffer of packed 0xAARRGGBB pixels. Renderers that filter
// their input need a halo, so their bounds query asks for a state larger
// than the target with a negative `min`.
//
// Preconditions: `render` and `update` in compute mode receive a state whose
//   shape came from a bounds query against the same target.
// Postconditions: compute mode writes exactly the output's reported shape.
// Failure modes: any access outside the reported shapes is reported through
//   the runtime error callback and makes the invocation fail.
// Side effects: none beyond the output buffer.

use std::fmt;

use bytemuck::Pod;

use crate::argument::Signature;
use crate::descriptor::{BufferDescriptor, DimensionBounds};
use crate::diag::{codes, Diagnostic};
use crate::image_param::{ImageParam, OutputImageParam};
use crate::param::Param;
use crate::runtime::{parallel_rows, Pipeline, PipelineArg, RuntimeContext};
use crate::types::{ScalarType, ScalarValue};

// ── Families ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemoKind {
    GameOfLife,
    Julia,
    ReactionDiffusion,
    ReactionDiffusion2,
}

impl DemoKind {
    pub const ALL: [DemoKind; 4] = [
        DemoKind::GameOfLife,
        DemoKind::Julia,
        DemoKind::ReactionDiffusion,
        DemoKind::ReactionDiffusion2,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            DemoKind::GameOfLife => "game_of_life",
            DemoKind::Julia => "julia",
            DemoKind::ReactionDiffusion => "reaction_diffusion",
            DemoKind::ReactionDiffusion2 => "reaction_diffusion_2",
        }
    }

    pub fn element_type(self) -> ScalarType {
        match self {
            DemoKind::GameOfLife => ScalarType::uint(8),
            _ => ScalarType::float(32),
        }
    }

    pub fn channels(self) -> i32 {
        match self {
            DemoKind::GameOfLife => 1,
            DemoKind::Julia => 2,
            DemoKind::ReactionDiffusion | DemoKind::ReactionDiffusion2 => 3,
        }
    }

    /// Extra state border the renderer reads on every side.
    pub fn halo(self) -> i32 {
        match self {
            DemoKind::GameOfLife | DemoKind::Julia => 0,
            DemoKind::ReactionDiffusion => 1,
            DemoKind::ReactionDiffusion2 => 2,
        }
    }
}

impl fmt::Display for DemoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Update,
    Render,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Update => "update",
            Stage::Render => "render",
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

fn stage_signature(kind: DemoKind, stage: Stage, name: &str) -> Result<Signature, Diagnostic> {
    let ty = kind.element_type();
    let mut sig = Signature::new(name);
    match stage {
        Stage::Init => {
            sig.push(OutputImageParam::with_name(ty, 3, "state").to_argument()?)?;
        }
        Stage::Update => {
            sig.push(ImageParam::with_name(ty, 3, "state").to_argument()?)?;
            sig.push(Param::<i32>::with_name("mouse_x").to_argument())?;
            sig.push(Param::<i32>::with_name("mouse_y").to_argument())?;
            sig.push(OutputImageParam::with_name(ty, 3, "new_state").to_argument()?)?;
        }
        Stage::Render => {
            sig.push(ImageParam::with_name(ty, 3, "state").to_argument()?)?;
            let target = OutputImageParam::with_name(ScalarType::int(32), 2, "render");
            sig.push(target.to_argument()?)?;
        }
    }
    Ok(sig)
}

/// One entry point of one demo family.
pub struct DemoPipeline {
    kind: DemoKind,
    stage: Stage,
    name: String,
    sig: Signature,
}

impl DemoPipeline {
    pub fn new(kind: DemoKind, stage: Stage) -> Result<Self, Diagnostic> {
        let name = format!("{}_{}", kind.name(), stage.name());
        let sig = stage_signature(kind, stage, &name)?;
        Ok(DemoPipeline {
            kind,
            stage,
            name,
            sig,
        })
    }

    pub fn kind(&self) -> DemoKind {
        self.kind
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn bad_arguments(&self) -> Diagnostic {
        Diagnostic::error(
            codes::E0206,
            format!("{} received arguments of the wrong shape", self.name),
        )
    }

    fn init(&self, args: &mut [PipelineArg<'_>]) -> Result<(), Diagnostic> {
        let [PipelineArg::Buffer(state)] = args else {
            return Err(self.bad_arguments());
        };
        if !state.is_backed() {
            return Err(Diagnostic::error(
                codes::E0200,
                format!("{} needs an allocated state buffer", self.name),
            ));
        }
        let kind = self.kind;
        let (xs, ys) = plane(state)?;
        match kind {
            DemoKind::GameOfLife => {
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    Ok(per_cell(xs, 1, |x, _| u8::from(hash2(x, y) % 4 == 0)))
                })?;
                write_rows(state, rows)
            }
            DemoKind::Julia => {
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    Ok(per_cell(xs, 2, |x, c| {
                        if c == 0 {
                            unit(x, xs) * 3.0 - 1.5
                        } else {
                            unit(y, ys) * 3.0 - 1.5
                        }
                    }))
                })?;
                write_rows(state, rows)
            }
            DemoKind::ReactionDiffusion | DemoKind::ReactionDiffusion2 => {
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    Ok(per_cell(xs, 3, |x, c| match c {
                        0 => 1.0f32,
                        1 if hash2(x, y) % 64 == 0 => 1.0,
                        _ => 0.0,
                    }))
                })?;
                write_rows(state, rows)
            }
        }
    }

    fn update(&self, args: &mut [PipelineArg<'_>]) -> Result<(), Diagnostic> {
        let [PipelineArg::Buffer(input), PipelineArg::Scalar(ScalarValue::I32(mx)), PipelineArg::Scalar(ScalarValue::I32(my)), PipelineArg::Buffer(output)] =
            args
        else {
            return Err(self.bad_arguments());
        };
        let (mx, my) = (*mx, *my);

        if !output.is_backed() {
            output.set_shape(input.dims().to_vec());
            return Ok(());
        }
        if !input.is_backed() {
            input.set_shape(output.dims().to_vec());
            return Ok(());
        }

        let input: &BufferDescriptor = &**input;
        let (xs, ys) = plane(output)?;
        let (ix, iy) = plane(input)?;
        let near_mouse = |x: i32, y: i32| within_brush(x, y, mx, my);
        match self.kind {
            DemoKind::GameOfLife => {
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    let mut row = Vec::with_capacity(xs.extent as usize);
                    for x in xs.min..xs.end() {
                        let mut count = 0;
                        for (dx, dy) in NEIGHBOURS {
                            let nx = clamp(x + dx, ix);
                            let ny = clamp(y + dy, iy);
                            count += u32::from(input.load::<u8>(&[nx, ny, 0])?);
                        }
                        let alive = input.load::<u8>(&[clamp(x, ix), clamp(y, iy), 0])? != 0;
                        let next = count == 3 || (alive && count == 2);
                        let seeded = near_mouse(x, y) && hash2(x, y) % 2 == 0;
                        row.push(u8::from(next || seeded));
                    }
                    Ok(row)
                })?;
                write_rows(output, rows)
            }
            DemoKind::Julia => {
                let c = if ix.contains(mx) && iy.contains(my) {
                    (unit(mx, ix) * 2.0 - 1.0, unit(my, iy) * 2.0 - 1.0)
                } else {
                    (-0.8, 0.156)
                };
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    let mut row = Vec::with_capacity(xs.extent as usize * 2);
                    for x in xs.min..xs.end() {
                        let (cx, cy) = (clamp(x, ix), clamp(y, iy));
                        let re = input.load::<f32>(&[cx, cy, 0])?;
                        let im = input.load::<f32>(&[cx, cy, 1])?;
                        if re * re + im * im > 4.0 {
                            row.extend([re, im]);
                        } else {
                            row.extend([re * re - im * im + c.0, 2.0 * re * im + c.1]);
                        }
                    }
                    Ok(row)
                })?;
                write_rows(output, rows)
            }
            DemoKind::ReactionDiffusion | DemoKind::ReactionDiffusion2 => {
                let (feed, kill) = if self.kind == DemoKind::ReactionDiffusion {
                    (0.035f32, 0.065f32)
                } else {
                    (0.030, 0.062)
                };
                let rows = parallel_rows(ys.min, ys.extent, |y| {
                    let mut row = Vec::with_capacity(xs.extent as usize * 3);
                    for x in xs.min..xs.end() {
                        let at = |dx: i32, dy: i32, c: i32| {
                            input.load::<f32>(&[clamp(x + dx, ix), clamp(y + dy, iy), c])
                        };
                        let (u, v) = (at(0, 0, 0)?, at(0, 0, 1)?);
                        let lap = |c: i32| -> Result<f32, Diagnostic> {
                            Ok(at(-1, 0, c)? + at(1, 0, c)? + at(0, -1, c)? + at(0, 1, c)?
                                - 4.0 * at(0, 0, c)?)
                        };
                        let reaction = u * v * v;
                        let mut nu = u + 0.16 * lap(0)? - reaction + feed * (1.0 - u);
                        let mut nv = v + 0.08 * lap(1)? + reaction - (feed + kill) * v;
                        if near_mouse(x, y) {
                            nu = 0.5;
                            nv = 0.25;
                        }
                        row.extend([nu.clamp(0.0, 1.0), nv.clamp(0.0, 1.0), nv - v]);
                    }
                    Ok(row)
                })?;
                write_rows(output, rows)
            }
        }
    }

    fn render(&self, args: &mut [PipelineArg<'_>]) -> Result<(), Diagnostic> {
        let [PipelineArg::Buffer(state), PipelineArg::Buffer(target)] = args else {
            return Err(self.bad_arguments());
        };
        let (tx, ty) = plane(target)?;
        let halo = self.kind.halo();

        if !state.is_backed() {
            state.set_dense_shape(&[
                (tx.min - halo, tx.extent + 2 * halo),
                (ty.min - halo, ty.extent + 2 * halo),
                (0, self.kind.channels()),
            ])?;
            return Ok(());
        }

        let state: &BufferDescriptor = &**state;
        let kind = self.kind;
        let rows = parallel_rows(ty.min, ty.extent, |y| {
            let mut row = Vec::with_capacity(tx.extent as usize);
            for x in tx.min..tx.end() {
                let pixel = match kind {
                    DemoKind::GameOfLife => {
                        if state.load::<u8>(&[x, y, 0])? != 0 {
                            rgb(255, 255, 255)
                        } else {
                            rgb(0, 0, 0)
                        }
                    }
                    DemoKind::Julia => {
                        let re = state.load::<f32>(&[x, y, 0])?;
                        let im = state.load::<f32>(&[x, y, 1])?;
                        let m = ((re * re + im * im) / 4.0).min(1.0);
                        let level = channel(1.0 - m);
                        rgb(level / 2, level, 255 - level / 2)
                    }
                    DemoKind::ReactionDiffusion | DemoKind::ReactionDiffusion2 => {
                        let mut sum = [0.0f32; 3];
                        for dy in -halo..=halo {
                            for dx in -halo..=halo {
                                for (c, s) in sum.iter_mut().enumerate() {
                                    *s += state.load::<f32>(&[x + dx, y + dy, c as i32])?;
                                }
                            }
                        }
                        let n = ((2 * halo + 1) * (2 * halo + 1)) as f32;
                        let [u, v, dv] = sum.map(|s| s / n);
                        rgb(channel(v * 4.0), channel(u * 0.75), channel(dv.abs() * 50.0))
                    }
                };
                row.push(pixel);
            }
            Ok(row)
        })?;
        write_rows(target, rows)
    }
}

impl Pipeline for DemoPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn run(&self, ctx: &RuntimeContext, args: &mut [PipelineArg<'_>]) -> i32 {
        let result = match self.stage {
            Stage::Init => self.init(args),
            Stage::Update => self.update(args),
            Stage::Render => self.render(args),
        };
        match result {
            Ok(()) => 0,
            Err(e) => ctx.report_error(format!("{}: {}", self.name, e.message)),
        }
    }
}

/// The three entry points of one family.
pub struct Demo {
    pub kind: DemoKind,
    pub init: DemoPipeline,
    pub update: DemoPipeline,
    pub render: DemoPipeline,
}

impl Demo {
    pub fn new(kind: DemoKind) -> Result<Self, Diagnostic> {
        Ok(Demo {
            kind,
            init: DemoPipeline::new(kind, Stage::Init)?,
            update: DemoPipeline::new(kind, Stage::Update)?,
            render: DemoPipeline::new(kind, Stage::Render)?,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// The x and y dimensions of a descriptor.
fn plane(desc: &BufferDescriptor) -> Result<(DimensionBounds, DimensionBounds), Diagnostic> {
    match (desc.dim(0), desc.dim(1)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(Diagnostic::error(
            codes::E0206,
            format!("{} needs at least 2 dimensions, has {}", desc.name(), desc.dimensions()),
        )),
    }
}

fn clamp(v: i32, d: DimensionBounds) -> i32 {
    v.clamp(d.min, (d.end() - 1).max(d.min))
}

/// Position of `v` within `d` scaled to [0, 1).
fn unit(v: i32, d: DimensionBounds) -> f32 {
    (v - d.min) as f32 / d.extent.max(1) as f32
}

/// One row of `channels` values per x, channel innermost.
fn per_cell<T>(xs: DimensionBounds, channels: i32, f: impl Fn(i32, i32) -> T) -> Vec<T> {
    let mut row = Vec::with_capacity((xs.extent * channels).max(0) as usize);
    for x in xs.min..xs.end() {
        for c in 0..channels {
            row.push(f(x, c));
        }
    }
    row
}

/// Store rows produced by `parallel_rows`. Each row holds every channel of
/// every x, channel innermost; 2-D outputs have one channel.
fn write_rows<T: Pod>(out: &mut BufferDescriptor, rows: Vec<Vec<T>>) -> Result<(), Diagnostic> {
    let (xs, ys) = plane(out)?;
    let (cmin, channels) = out.dim(2).map_or((0, 1), |c| (c.min, c.extent.max(1)));
    let dims = out.dimensions().min(3);
    for (j, row) in rows.into_iter().enumerate() {
        let y = ys.min + j as i32;
        for (i, value) in row.into_iter().enumerate() {
            let i = i as i32;
            let coords = [xs.min + i / channels, y, cmin + i % channels];
            out.store(&coords[..dims], value)?;
        }
    }
    Ok(())
}

/// True if `(x, y)` lies inside the radius-10 brush centred on the mouse.
fn within_brush(x: i32, y: i32, mx: i32, my: i32) -> bool {
    let dx = (i64::from(x) - i64::from(mx)).abs();
    let dy = (i64::from(y) - i64::from(my)).abs();
    dx < 10 && dy < 10 && dx * dx + dy * dy < 100
}

fn hash2(x: i32, y: i32) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B9) ^ (y as u32).wrapping_mul(0x85EB_CA6B);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    h
}

fn channel(v: f32) -> u32 {
    (v.clamp(0.0, 1.0) * 255.0) as u32
}

fn rgb(r: u32, g: u32, b: u32) -> i32 {
    (0xFF00_0000 | (r.min(255) << 16) | (g.min(255) << 8) | b.min(255)) as i32
}
