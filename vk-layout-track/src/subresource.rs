//! Addressing of image subresources as linear indices.
//!
//! An image is a three-dimensional grid of subresources: one per combination
//! of aspect, mip level and array layer. [`SubresourceEncoder`] flattens that
//! grid into a dense range of `u32` indices so that per-subresource state can
//! be kept in a [`RangeMap`](crate::range_map::RangeMap), and
//! [`SubresourceRangeIterator`] turns a [`SubresourceRange`] selection into
//! the minimal sequence of contiguous index ranges covering it.

use ash::vk;
use smallvec::SmallVec;
use std::{iter::Peekable, ops::Range};

/// The linear index of a single subresource within an image.
pub type SubresourceIndex = u32;

/// The aspects a subresource index can be assigned to, in encoding order.
const ORDERED_ASPECTS: [vk::ImageAspectFlags; 6] = [
    vk::ImageAspectFlags::COLOR,
    vk::ImageAspectFlags::DEPTH,
    vk::ImageAspectFlags::STENCIL,
    vk::ImageAspectFlags::PLANE_0,
    vk::ImageAspectFlags::PLANE_1,
    vk::ImageAspectFlags::PLANE_2,
];

/// Returns the aspects that the subresources of an image with the given
/// format are addressed by.
///
/// Combined depth/stencil formats report both `DEPTH` and `STENCIL`, and
/// multi-planar formats report one `PLANE_N` aspect per plane. Everything
/// else, including the packed YCbCr formats, is a single `COLOR` aspect.
pub fn format_aspects(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::UNDEFINED => vk::ImageAspectFlags::empty(),

        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }

        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }

        vk::Format::G8_B8R8_2PLANE_420_UNORM
        | vk::Format::G8_B8R8_2PLANE_422_UNORM
        | vk::Format::G8_B8R8_2PLANE_444_UNORM
        | vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16
        | vk::Format::G10X6_B10X6R10X6_2PLANE_422_UNORM_3PACK16
        | vk::Format::G10X6_B10X6R10X6_2PLANE_444_UNORM_3PACK16
        | vk::Format::G12X4_B12X4R12X4_2PLANE_420_UNORM_3PACK16
        | vk::Format::G12X4_B12X4R12X4_2PLANE_422_UNORM_3PACK16
        | vk::Format::G12X4_B12X4R12X4_2PLANE_444_UNORM_3PACK16
        | vk::Format::G16_B16R16_2PLANE_420_UNORM
        | vk::Format::G16_B16R16_2PLANE_422_UNORM
        | vk::Format::G16_B16R16_2PLANE_444_UNORM => {
            vk::ImageAspectFlags::PLANE_0 | vk::ImageAspectFlags::PLANE_1
        }

        vk::Format::G8_B8_R8_3PLANE_420_UNORM
        | vk::Format::G8_B8_R8_3PLANE_422_UNORM
        | vk::Format::G8_B8_R8_3PLANE_444_UNORM
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_420_UNORM_3PACK16
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_422_UNORM_3PACK16
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_444_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_420_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_422_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_444_UNORM_3PACK16
        | vk::Format::G16_B16_R16_3PLANE_420_UNORM
        | vk::Format::G16_B16_R16_3PLANE_422_UNORM
        | vk::Format::G16_B16_R16_3PLANE_444_UNORM => {
            vk::ImageAspectFlags::PLANE_0
                | vk::ImageAspectFlags::PLANE_1
                | vk::ImageAspectFlags::PLANE_2
        }

        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// One aspect of one mip level of one array layer of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subresource {
    /// The aspect. Always exactly one bit.
    pub aspect: vk::ImageAspectFlags,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// A selection of subresources of an image.
///
/// Unlike [`vk::ImageSubresourceRange`], the mip level and array layer
/// selections are plain half-open ranges; the `REMAINING_*` sentinel values
/// have already been resolved against the image. See
/// [`TrackedImage::normalize_range`](crate::image::TrackedImage::normalize_range).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubresourceRange {
    /// One or more aspect bits.
    pub aspects: vk::ImageAspectFlags,
    pub mip_levels: Range<u32>,
    pub array_layers: Range<u32>,
}

/// Maps each subresource of one image to a linear index.
///
/// Indices are assigned aspect-major: all subresources of the first aspect
/// come first, then all of the second, and so on. Within an aspect they are
/// mip-major, so the layers of one mip level occupy consecutive indices. A
/// selection of consecutive layers is therefore a single contiguous index
/// range, which is the common case for barriers and view usage.
///
/// For 3D images created for 2D-array views, the caller constructs the
/// encoder with one "layer" per depth slice, so that individual slices can
/// hold state of their own.
#[derive(Clone, Debug)]
pub struct SubresourceEncoder {
    aspect_list: SmallVec<[vk::ImageAspectFlags; 4]>,
    mip_levels: u32,
    array_layers: u32,
}

impl SubresourceEncoder {
    /// Builds an encoder for an image with the given aspects and extents.
    ///
    /// # Panics
    ///
    /// - Panics if `aspects` is empty or contains bits other than color,
    ///   depth, stencil or plane aspects.
    /// - Panics if `mip_levels` or `array_layers` is zero.
    pub fn new(aspects: vk::ImageAspectFlags, mip_levels: u32, array_layers: u32) -> Self {
        assert!(!aspects.is_empty());
        assert!(mip_levels >= 1);
        assert!(array_layers >= 1);

        let aspect_list: SmallVec<[vk::ImageAspectFlags; 4]> = ORDERED_ASPECTS
            .into_iter()
            .filter(|&aspect| aspects.intersects(aspect))
            .collect();

        // Any bit not in the ordered list is unknown to the encoder.
        let known = aspect_list
            .iter()
            .fold(vk::ImageAspectFlags::empty(), |all, &aspect| all | aspect);
        assert!(known == aspects);

        SubresourceEncoder {
            aspect_list,
            mip_levels,
            array_layers,
        }
    }

    /// Returns the union of all aspects the encoder addresses.
    #[inline]
    pub fn aspects(&self) -> vk::ImageAspectFlags {
        self.aspect_list
            .iter()
            .fold(vk::ImageAspectFlags::empty(), |all, &aspect| all | aspect)
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// The number of indices one mip level of one aspect occupies.
    #[inline]
    pub(crate) fn mip_level_size(&self) -> u32 {
        self.array_layers
    }

    /// The number of indices one aspect occupies.
    #[inline]
    pub(crate) fn aspect_size(&self) -> u32 {
        self.mip_level_size() * self.mip_levels
    }

    /// The total number of subresources. Every index below this value maps to
    /// a subresource and vice versa.
    #[inline]
    pub fn subresource_count(&self) -> u32 {
        self.aspect_list.len() as u32 * self.aspect_size()
    }

    /// Returns the selection covering every subresource of the image.
    #[inline]
    pub fn whole_range(&self) -> SubresourceRange {
        SubresourceRange {
            aspects: self.aspects(),
            mip_levels: 0..self.mip_levels,
            array_layers: 0..self.array_layers,
        }
    }

    /// Returns whether `range` is a valid selection for this image: at least
    /// one aspect, all aspects present in the image, and non-empty mip level
    /// and array layer ranges within the image's extents.
    pub fn in_range(&self, range: &SubresourceRange) -> bool {
        !range.aspects.is_empty()
            && self.aspects().contains(range.aspects)
            && range.mip_levels.start < range.mip_levels.end
            && range.mip_levels.end <= self.mip_levels
            && range.array_layers.start < range.array_layers.end
            && range.array_layers.end <= self.array_layers
    }

    /// Returns the linear index of `subresource`.
    ///
    /// # Panics
    ///
    /// - Panics if the subresource's aspect is not an aspect of the image, or
    ///   its mip level or array layer is out of bounds.
    pub fn encode(&self, subresource: Subresource) -> SubresourceIndex {
        assert!(subresource.mip_level < self.mip_levels);
        assert!(subresource.array_layer < self.array_layers);

        let aspect_num = self
            .aspect_list
            .iter()
            .position(|&aspect| aspect == subresource.aspect);
        assert!(aspect_num.is_some());

        aspect_num.unwrap() as u32 * self.aspect_size()
            + subresource.mip_level * self.mip_level_size()
            + subresource.array_layer
    }

    /// Returns the subresource that `index` maps to. The inverse of
    /// [`encode`](Self::encode).
    ///
    /// # Panics
    ///
    /// - Panics if `index` is not below
    ///   [`subresource_count`](Self::subresource_count).
    pub fn decode(&self, index: SubresourceIndex) -> Subresource {
        assert!(index < self.subresource_count());

        let aspect_num = index / self.aspect_size();
        let within_aspect = index % self.aspect_size();

        Subresource {
            aspect: self.aspect_list[aspect_num as usize],
            mip_level: within_aspect / self.mip_level_size(),
            array_layer: within_aspect % self.mip_level_size(),
        }
    }

    /// Returns the sequence of contiguous index ranges that exactly covers
    /// `subresource_range`.
    ///
    /// The ranges are produced lazily, in increasing order, and are maximal:
    /// adjacent selected subresources always end up in the same range. A
    /// whole-image selection yields a single range regardless of the image's
    /// subresource count.
    ///
    /// # Panics
    ///
    /// - Panics if `subresource_range` does not satisfy
    ///   [`in_range`](Self::in_range).
    pub fn iter_ranges(&self, subresource_range: SubresourceRange) -> SubresourceRangeIterator {
        assert!(self.in_range(&subresource_range));

        SubresourceRangeIterator::new(
            subresource_range,
            &self.aspect_list,
            self.aspect_size(),
            self.mip_levels,
            self.mip_level_size(),
            self.array_layers,
        )
    }
}

/// Produced by [`SubresourceEncoder::iter_ranges`].
#[derive(Clone)]
pub struct SubresourceRangeIterator {
    next_fn: fn(&mut Self) -> Option<Range<SubresourceIndex>>,
    aspect_size: u32,
    mip_level_size: u32,
    mip_levels: Range<u32>,
    array_layers: Range<u32>,
    aspect_nums: Peekable<smallvec::IntoIter<[usize; 4]>>,
    current_aspect_num: Option<usize>,
    current_mip_level: u32,
}

impl SubresourceRangeIterator {
    fn new(
        subresource_range: SubresourceRange,
        image_aspect_list: &[vk::ImageAspectFlags],
        image_aspect_size: u32,
        image_mip_levels: u32,
        image_mip_level_size: u32,
        image_array_layers: u32,
    ) -> Self {
        let next_fn = if subresource_range.array_layers.start != 0
            || subresource_range.array_layers.end != image_array_layers
        {
            Self::next_some_layers
        } else if subresource_range.mip_levels.start != 0
            || subresource_range.mip_levels.end != image_mip_levels
        {
            Self::next_some_mip_levels
        } else {
            Self::next_whole_aspects
        };

        let mut aspect_nums = image_aspect_list
            .iter()
            .enumerate()
            .filter(|(_, &aspect)| subresource_range.aspects.intersects(aspect))
            .map(|(aspect_num, _)| aspect_num)
            .collect::<SmallVec<[usize; 4]>>()
            .into_iter()
            .peekable();
        let current_aspect_num = aspect_nums.next();
        let current_mip_level = subresource_range.mip_levels.start;

        SubresourceRangeIterator {
            next_fn,
            aspect_size: image_aspect_size,
            mip_level_size: image_mip_level_size,
            mip_levels: subresource_range.mip_levels,
            array_layers: subresource_range.array_layers,
            aspect_nums,
            current_aspect_num,
            current_mip_level,
        }
    }

    /// Used when the selection covers all mip levels and all array layers.
    /// Each selected aspect covers one contiguous block of indices, and
    /// blocks of consecutive aspects are merged.
    fn next_whole_aspects(&mut self) -> Option<Range<SubresourceIndex>> {
        self.current_aspect_num.map(|aspect_num| {
            let mut aspect_num_end = aspect_num + 1;

            while self.aspect_nums.peek().copied() == Some(aspect_num_end) {
                self.aspect_nums.next();
                aspect_num_end += 1;
            }

            self.current_aspect_num = self.aspect_nums.next();

            let start = aspect_num as u32 * self.aspect_size;
            let end = aspect_num_end as u32 * self.aspect_size;
            start..end
        })
    }

    /// Used when the selection covers a strict subset of the mip levels but
    /// all array layers. The selected mip levels of one aspect are
    /// contiguous, so one range is produced per selected aspect.
    fn next_some_mip_levels(&mut self) -> Option<Range<SubresourceIndex>> {
        self.current_aspect_num.map(|aspect_num| {
            self.current_aspect_num = self.aspect_nums.next();

            let aspect_start = aspect_num as u32 * self.aspect_size;
            let start = aspect_start + self.mip_levels.start * self.mip_level_size;
            let end = aspect_start + self.mip_levels.end * self.mip_level_size;
            start..end
        })
    }

    /// Used when the selection covers a strict subset of the array layers.
    /// One range is produced per selected (aspect, mip level) pair.
    fn next_some_layers(&mut self) -> Option<Range<SubresourceIndex>> {
        self.current_aspect_num.map(|aspect_num| {
            let mip_start =
                aspect_num as u32 * self.aspect_size + self.current_mip_level * self.mip_level_size;

            self.current_mip_level += 1;

            if self.current_mip_level >= self.mip_levels.end {
                self.current_mip_level = self.mip_levels.start;
                self.current_aspect_num = self.aspect_nums.next();
            }

            let start = mip_start + self.array_layers.start;
            let end = mip_start + self.array_layers.end;
            start..end
        })
    }
}

impl Iterator for SubresourceRangeIterator {
    type Item = Range<SubresourceIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        (self.next_fn)(self)
    }
}
