// SPDX-License-Identifier: CEPL-1.0
use std::mem::size_of;

use ash::vk;
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::command::CommandContext;
use crate::error::{PipelineError, PushConstantError, RecordError};

/// Every device guarantees at least this many bytes of push constants.
pub const GUARANTEED_PUSH_CONSTANT_BYTES: u32 = 128;

// The largest value must fit the guaranteed budget, and every value must keep
// 4-byte granularity so offsets stay aligned.
const _: () = assert!(size_of::<Mat4>() <= GUARANTEED_PUSH_CONSTANT_BYTES as usize);
const _: () = assert!(size_of::<Vec2>() % 4 == 0);
const _: () = assert!(size_of::<Vec3>() % 4 == 0);
const _: () = assert!(size_of::<Vec4>() % 4 == 0);
const _: () = assert!(size_of::<Mat4>() % 4 == 0);

/// A single push-constant upload. `Bool` travels as a 32-bit integer, the
/// way shaders declare it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PushConstantValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl PushConstantValue {
    pub fn size(&self) -> u32 {
        let n = match self {
            PushConstantValue::Bool(_) | PushConstantValue::UInt(_) => size_of::<u32>(),
            PushConstantValue::Int(_) => size_of::<i32>(),
            PushConstantValue::Float(_) => size_of::<f32>(),
            PushConstantValue::Vec2(_) => size_of::<Vec2>(),
            PushConstantValue::Vec3(_) => size_of::<Vec3>(),
            PushConstantValue::Vec4(_) => size_of::<Vec4>(),
            PushConstantValue::Mat4(_) => size_of::<Mat4>(),
        };
        n as u32
    }

    fn write(&self, out: &mut [u8]) {
        let bytes: &[u8] = match self {
            PushConstantValue::Bool(b) => {
                out.copy_from_slice(bytemuck::bytes_of(&u32::from(*b)));
                return;
            }
            PushConstantValue::Int(v) => bytemuck::bytes_of(v),
            PushConstantValue::UInt(v) => bytemuck::bytes_of(v),
            PushConstantValue::Float(v) => bytemuck::bytes_of(v),
            PushConstantValue::Vec2(v) => bytemuck::bytes_of(v),
            PushConstantValue::Vec3(v) => bytemuck::bytes_of(v),
            PushConstantValue::Vec4(v) => bytemuck::bytes_of(v),
            PushConstantValue::Mat4(v) => bytemuck::bytes_of(v),
        };
        out.copy_from_slice(bytes);
    }
}

impl From<f32> for PushConstantValue {
    fn from(v: f32) -> Self {
        PushConstantValue::Float(v)
    }
}

impl From<Vec4> for PushConstantValue {
    fn from(v: Vec4) -> Self {
        PushConstantValue::Vec4(v)
    }
}

impl From<Mat4> for PushConstantValue {
    fn from(v: Mat4) -> Self {
        PushConstantValue::Mat4(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Write {
    stages: vk::ShaderStageFlags,
    offset: u32,
    len: u32,
}

/// CPU-side shadow of a pipeline's push-constant space. Values persist
/// across ticks and are re-pushed every time the pipeline records.
#[derive(Debug)]
pub struct PushConstantBlock {
    ranges: Vec<vk::PushConstantRange>,
    data: Vec<u8>,
    writes: Vec<Write>,
}

impl PushConstantBlock {
    pub fn new(ranges: &[vk::PushConstantRange], limit: u32) -> Result<Self, PipelineError> {
        let mut end = 0u32;
        for r in ranges {
            if r.offset % 4 != 0 {
                return Err(PushConstantError::Misaligned(r.offset).into());
            }
            let last = r.offset.checked_add(r.size).unwrap_or(u32::MAX);
            if r.size == 0 || r.size % 4 != 0 || last > limit {
                return Err(PipelineError::PushRangeTooLarge {
                    offset: r.offset,
                    size: r.size,
                    limit,
                });
            }
            end = end.max(last);
        }
        Ok(PushConstantBlock {
            ranges: ranges.to_vec(),
            data: vec![0; end as usize],
            writes: Vec::new(),
        })
    }

    pub fn ranges(&self) -> &[vk::PushConstantRange] {
        &self.ranges
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn set(
        &mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: PushConstantValue,
    ) -> Result<(), PushConstantError> {
        let size = value.size();
        if offset % 4 != 0 {
            return Err(PushConstantError::Misaligned(offset));
        }
        let end = offset as usize + size as usize;
        if end > self.data.len() {
            return Err(PushConstantError::OutOfBounds {
                offset,
                size,
                limit: self.data.len() as u32,
            });
        }
        if !self.covers(stages, offset, size) {
            return Err(PushConstantError::NotCovered {
                stages,
                offset,
                size,
            });
        }
        value.write(&mut self.data[offset as usize..end]);

        let w = Write {
            stages,
            offset,
            len: size,
        };
        match self
            .writes
            .iter_mut()
            .find(|x| x.stages == stages && x.offset == offset)
        {
            Some(existing) => *existing = w,
            None => self.writes.push(w),
        }
        Ok(())
    }

    /// One range must hold the whole write for every requested stage, and
    /// every range the write touches must be fully named in `stages`.
    fn covers(&self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> bool {
        if stages.is_empty() {
            return false;
        }
        let end = offset + size;
        let holder = self.ranges.iter().any(|r| {
            r.stage_flags.contains(stages) && r.offset <= offset && end <= r.offset + r.size
        });
        let overlapping_ok = self
            .ranges
            .iter()
            .filter(|r| r.offset < end && offset < r.offset + r.size)
            .all(|r| stages.contains(r.stage_flags));
        holder && overlapping_ok
    }

    pub(crate) fn record(
        &self,
        ctx: &mut CommandContext<'_>,
        layout: vk::PipelineLayout,
    ) -> Result<(), RecordError> {
        for w in &self.writes {
            let start = w.offset as usize;
            let bytes = &self.data[start..start + w.len as usize];
            ctx.push_constants(layout, w.stages, w.offset, bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;
    const FS: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;

    fn range(stage_flags: vk::ShaderStageFlags, offset: u32, size: u32) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags,
            offset,
            size,
        }
    }

    #[test]
    fn value_sizes_match_shader_layout() {
        assert_eq!(PushConstantValue::Bool(true).size(), 4);
        assert_eq!(PushConstantValue::Vec3(Vec3::ONE).size(), 12);
        assert_eq!(PushConstantValue::Mat4(Mat4::IDENTITY).size(), 64);
    }

    #[test]
    fn bool_is_written_as_u32() {
        let mut b = PushConstantBlock::new(&[range(FS, 0, 4)], 128).unwrap();
        b.set(FS, 0, PushConstantValue::Bool(true)).unwrap();
        assert_eq!(b.bytes(), &1u32.to_ne_bytes());
    }

    #[test]
    fn float_lands_at_offset() {
        let mut b = PushConstantBlock::new(&[range(VS | FS, 0, 32)], 128).unwrap();
        b.set(VS | FS, 16, PushConstantValue::Float(2.5)).unwrap();
        assert_eq!(&b.bytes()[16..20], &2.5f32.to_ne_bytes());
        assert!(b.bytes()[..16].iter().all(|&x| x == 0));
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        let mut b = PushConstantBlock::new(&[range(VS, 0, 16)], 128).unwrap();
        assert_eq!(
            b.set(VS, 2, PushConstantValue::UInt(1)),
            Err(PushConstantError::Misaligned(2))
        );
    }

    #[test]
    fn write_past_the_block_is_rejected() {
        let mut b = PushConstantBlock::new(&[range(VS, 0, 16)], 128).unwrap();
        assert_eq!(
            b.set(VS, 0, PushConstantValue::Mat4(Mat4::IDENTITY)),
            Err(PushConstantError::OutOfBounds {
                offset: 0,
                size: 64,
                limit: 16
            })
        );
    }

    #[test]
    fn stage_must_be_covered_by_a_range() {
        let mut b = PushConstantBlock::new(&[range(VS, 0, 16), range(FS, 16, 16)], 128).unwrap();
        assert!(b.set(FS, 16, PushConstantValue::Vec4(Vec4::ONE)).is_ok());
        assert!(matches!(
            b.set(FS, 0, PushConstantValue::Vec4(Vec4::ONE)),
            Err(PushConstantError::NotCovered { .. })
        ));
        assert!(matches!(
            b.set(vk::ShaderStageFlags::empty(), 0, PushConstantValue::Float(0.0)),
            Err(PushConstantError::NotCovered { .. })
        ));
    }

    #[test]
    fn ranges_beyond_device_limit_are_rejected() {
        assert!(matches!(
            PushConstantBlock::new(&[range(VS, 64, 128)], 128),
            Err(PipelineError::PushRangeTooLarge {
                offset: 64,
                size: 128,
                limit: 128
            })
        ));
        assert!(PushConstantBlock::new(&[range(VS, 64, 128)], 256).is_ok());
    }

    #[test]
    fn repeated_writes_replace_each_other() {
        let mut b = PushConstantBlock::new(&[range(FS, 0, 16)], 128).unwrap();
        b.set(FS, 0, 1.0f32.into()).unwrap();
        b.set(FS, 0, 3.0f32.into()).unwrap();
        assert_eq!(b.writes.len(), 1);
        assert_eq!(&b.bytes()[..4], &3.0f32.to_ne_bytes());
    }
}
