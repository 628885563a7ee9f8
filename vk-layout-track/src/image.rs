//! Per-image tracking state.
//!
//! A [`TrackedImage`] is created alongside each Vulkan image and owns the
//! image's committed layout map, the ground truth that queue submissions are
//! validated against and updated into. A [`TrackedImageView`] pairs a view
//! handle with the subresources it addresses. Both are cheap bookkeeping
//! records; they never touch the driver.

use crate::{
    range_map::RangeMap,
    subresource::{format_aspects, Subresource, SubresourceEncoder, SubresourceRange},
    NonExhaustive,
};
use ash::vk;
use parking_lot::RwLock;
use std::{
    num::NonZeroU64,
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

// Resolves a raw aspect mask against an image's format aspects: empty means
// all of them, and color on a multi-planar format means all of its planes.
fn resolve_aspects(
    format_aspects: vk::ImageAspectFlags,
    aspect_mask: vk::ImageAspectFlags,
) -> vk::ImageAspectFlags {
    if aspect_mask.is_empty() {
        format_aspects
    } else if aspect_mask.intersects(vk::ImageAspectFlags::COLOR)
        && format_aspects.intersects(vk::ImageAspectFlags::PLANE_0)
    {
        (aspect_mask & !vk::ImageAspectFlags::COLOR)
            | (format_aspects
                & (vk::ImageAspectFlags::PLANE_0
                    | vk::ImageAspectFlags::PLANE_1
                    | vk::ImageAspectFlags::PLANE_2))
    } else {
        aspect_mask
    }
}

/// Parameters of a tracked image, taken from the image's create info.
#[derive(Clone, Debug)]
pub struct ImageInfo {
    /// The flags the image was created with.
    ///
    /// The default value is empty.
    pub flags: vk::ImageCreateFlags,

    /// The default value is [`vk::ImageType::TYPE_2D`].
    pub image_type: vk::ImageType,

    /// The default value is [`vk::Format::UNDEFINED`], which must be
    /// overridden.
    pub format: vk::Format,

    /// The extent of the base mip level.
    ///
    /// The default value is `[0; 3]`, which must be overridden.
    pub extent: [u32; 3],

    /// The default value is `1`.
    pub mip_levels: u32,

    /// The default value is `1`.
    pub array_layers: u32,

    pub _ne: NonExhaustive,
}

impl ImageInfo {
    /// Returns a default `ImageInfo`.
    #[inline]
    pub const fn new() -> Self {
        ImageInfo {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: [0; 3],
            mip_levels: 1,
            array_layers: 1,
            _ne: NonExhaustive(()),
        }
    }
}

impl Default for ImageInfo {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters of a tracked image view, taken from the view's create info.
#[derive(Clone, Debug)]
pub struct ImageViewInfo {
    /// The default value is [`vk::ImageViewType::TYPE_2D`].
    pub view_type: vk::ImageViewType,

    /// The subresources the view addresses.
    ///
    /// `REMAINING_MIP_LEVELS` and `REMAINING_ARRAY_LAYERS` are resolved
    /// against the image, and an empty `aspect_mask` selects all aspects of
    /// the image's format.
    ///
    /// The default value covers the whole image.
    pub subresource_range: vk::ImageSubresourceRange,

    /// The depth slices addressed by a 3D view of a 2D-array-compatible 3D
    /// image, if the view was created with an explicit slice range.
    ///
    /// The default value is `None`.
    pub depth_slices: Option<Range<u32>>,

    pub _ne: NonExhaustive,
}

impl ImageViewInfo {
    /// Returns a default `ImageViewInfo`.
    #[inline]
    pub const fn new() -> Self {
        ImageViewInfo {
            view_type: vk::ImageViewType::TYPE_2D,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::empty(),
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
            depth_slices: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl Default for ImageViewInfo {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// An identifier for a [`TrackedImage`] that is unique within the process.
///
/// Raw `vk::Image` handles can be reused by the driver after the image is
/// destroyed; the id tells a record made for a previous incarnation of a
/// handle apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(NonZeroU64);

impl ImageId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        ImageId(NonZeroU64::new(id).unwrap())
    }

    /// Returns the numeric value of the id.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

/// The tracking record for one Vulkan image.
///
/// Holds the creation parameters needed to address subresources, and the
/// image's committed layout map: the layout each subresource was left in by
/// the work submitted so far. The map starts out empty; a subresource without
/// an entry has no committed layout yet and matches any expectation.
///
/// The record is typically created in an `Arc` when the image is created and
/// dropped when the image is destroyed. Command buffer state holds `Arc`
/// clones, so layout state recorded against an image stays coherent even if
/// the application destroys the image before the command buffer.
#[derive(Debug)]
pub struct TrackedImage {
    handle: vk::Image,
    id: ImageId,
    flags: vk::ImageCreateFlags,
    image_type: vk::ImageType,
    format: vk::Format,
    format_aspects: vk::ImageAspectFlags,
    extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
    encoder: SubresourceEncoder,
    layout_map: RwLock<RangeMap<vk::ImageLayout>>,
}

impl TrackedImage {
    /// Creates the tracking record for `handle`.
    ///
    /// # Panics
    ///
    /// - Panics if `info.format` is [`vk::Format::UNDEFINED`].
    /// - Panics if `info.extent` contains a zero, or `info.mip_levels` or
    ///   `info.array_layers` is zero.
    /// - Panics if `info.image_type` is [`vk::ImageType::TYPE_3D`] and
    ///   `info.array_layers` is not `1`.
    pub fn new(handle: vk::Image, info: ImageInfo) -> Self {
        let ImageInfo {
            flags,
            image_type,
            format,
            extent,
            mip_levels,
            array_layers,
            _ne: _,
        } = info;

        assert!(format != vk::Format::UNDEFINED);
        assert!(extent[0] >= 1 && extent[1] >= 1 && extent[2] >= 1);
        assert!(mip_levels >= 1);
        assert!(array_layers >= 1);
        assert!(image_type != vk::ImageType::TYPE_3D || array_layers == 1);

        let format_aspects = format_aspects(format);

        // A 2D-array-compatible 3D image can have individual depth slices
        // bound as layers, so each slice gets its own tracking unit. The
        // base extent's depth is used for every mip level.
        let layer_units = if image_type == vk::ImageType::TYPE_3D
            && flags.intersects(vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE)
        {
            extent[2]
        } else {
            array_layers
        };

        let encoder = SubresourceEncoder::new(format_aspects, mip_levels, layer_units);

        TrackedImage {
            handle,
            id: ImageId::next(),
            flags,
            image_type,
            format,
            format_aspects,
            extent,
            mip_levels,
            array_layers,
            encoder,
            layout_map: RwLock::new(RangeMap::new()),
        }
    }

    /// Returns the raw image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Returns the process-unique id of this record.
    #[inline]
    pub fn id(&self) -> ImageId {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> vk::ImageCreateFlags {
        self.flags
    }

    #[inline]
    pub fn image_type(&self) -> vk::ImageType {
        self.image_type
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the aspects of the image's format.
    #[inline]
    pub fn format_aspects(&self) -> vk::ImageAspectFlags {
        self.format_aspects
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Returns the encoder assigning a linear index to each subresource.
    #[inline]
    pub fn encoder(&self) -> &SubresourceEncoder {
        &self.encoder
    }

    /// Returns whether individual depth slices of this image hold tracking
    /// state of their own. This is the case for 3D images created with the
    /// [`vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE`] flag.
    #[inline]
    pub fn tracks_depth_slices(&self) -> bool {
        self.image_type == vk::ImageType::TYPE_3D
            && self
                .flags
                .intersects(vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE)
    }

    /// Returns the selection covering every subresource of the image.
    #[inline]
    pub fn subresource_range(&self) -> SubresourceRange {
        self.encoder.whole_range()
    }

    /// Resolves a raw subresource range against this image.
    ///
    /// - An empty aspect mask selects all aspects of the image's format, and
    ///   `COLOR` on a multi-planar image selects all of its planes.
    /// - `REMAINING_MIP_LEVELS` and `REMAINING_ARRAY_LAYERS` are resolved
    ///   against the image's extents.
    /// - On an image whose depth slices are tracked individually, any layer
    ///   selection covers all depth slices, since image-level operations
    ///   always address whole mip levels of a 3D image.
    ///
    /// # Panics
    ///
    /// - Panics if `range.base_mip_level` or `range.base_array_layer` is out
    ///   of bounds.
    pub fn normalize_range(&self, range: &vk::ImageSubresourceRange) -> SubresourceRange {
        let aspects = resolve_aspects(self.format_aspects, range.aspect_mask);

        assert!(range.base_mip_level < self.mip_levels);
        let mip_levels_end = if range.level_count == vk::REMAINING_MIP_LEVELS {
            self.mip_levels
        } else {
            range.base_mip_level + range.level_count
        };

        let array_layers = if self.tracks_depth_slices() {
            0..self.encoder.array_layers()
        } else {
            assert!(range.base_array_layer < self.encoder.array_layers());
            let end = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
                self.encoder.array_layers()
            } else {
                range.base_array_layer + range.layer_count
            };
            range.base_array_layer..end
        };

        SubresourceRange {
            aspects,
            mip_levels: range.base_mip_level..mip_levels_end,
            array_layers,
        }
    }

    /// Returns the committed layout of one subresource, or `None` if nothing
    /// has been committed for it yet.
    ///
    /// # Panics
    ///
    /// - Panics if `subresource` is out of bounds for this image.
    pub fn committed_layout(&self, subresource: Subresource) -> Option<vk::ImageLayout> {
        let index = self.encoder.encode(subresource);

        self.layout_map.read().get(index).copied()
    }

    /// The committed layout map. Read-locked for submit-time validation,
    /// write-locked only while committing an accepted submission.
    #[inline]
    pub(crate) fn layout_map(&self) -> &RwLock<RangeMap<vk::ImageLayout>> {
        &self.layout_map
    }
}

/// The tracking record for one Vulkan image view.
#[derive(Debug)]
pub struct TrackedImageView {
    handle: vk::ImageView,
    image: Arc<TrackedImage>,
    subresource_range: SubresourceRange,
    depth_sliced: bool,
}

impl TrackedImageView {
    /// Creates the tracking record for `handle`, a view of `image`.
    ///
    /// For views of a 2D-array-compatible 3D image, the resolved selection
    /// addresses depth slices: a 2D or 2D-array view's `base_array_layer` and
    /// `layer_count` select slices, and a 3D view selects the slices given in
    /// `info.depth_slices`, or all of them.
    ///
    /// # Panics
    ///
    /// - Panics if the resolved selection is out of bounds for `image`.
    /// - Panics if `info.depth_slices` is given but `image` does not track
    ///   depth slices or `info.view_type` is not [`vk::ImageViewType::TYPE_3D`].
    pub fn new(handle: vk::ImageView, image: Arc<TrackedImage>, info: ImageViewInfo) -> Self {
        let ImageViewInfo {
            view_type,
            subresource_range: raw_range,
            depth_slices,
            _ne: _,
        } = info;

        assert!(
            depth_slices.is_none()
                || (image.tracks_depth_slices() && view_type == vk::ImageViewType::TYPE_3D)
        );

        let aspects = resolve_aspects(image.format_aspects(), raw_range.aspect_mask);

        let mip_levels_end = if raw_range.level_count == vk::REMAINING_MIP_LEVELS {
            image.mip_levels()
        } else {
            raw_range.base_mip_level + raw_range.level_count
        };
        let mip_levels = raw_range.base_mip_level..mip_levels_end;

        let layer_units = image.encoder().array_layers();
        let mut depth_sliced = false;

        let array_layers = if image.tracks_depth_slices() {
            match view_type {
                vk::ImageViewType::TYPE_2D | vk::ImageViewType::TYPE_2D_ARRAY => {
                    // The view's layer selection addresses depth slices.
                    depth_sliced = true;
                    let end = if raw_range.layer_count == vk::REMAINING_ARRAY_LAYERS {
                        layer_units
                    } else {
                        raw_range.base_array_layer + raw_range.layer_count
                    };
                    raw_range.base_array_layer..end
                }
                _ => match depth_slices {
                    Some(slices) => {
                        depth_sliced = true;
                        slices
                    }
                    None => 0..layer_units,
                },
            }
        } else {
            let end = if raw_range.layer_count == vk::REMAINING_ARRAY_LAYERS {
                layer_units
            } else {
                raw_range.base_array_layer + raw_range.layer_count
            };
            raw_range.base_array_layer..end
        };

        let subresource_range = SubresourceRange {
            aspects,
            mip_levels,
            array_layers,
        };
        assert!(image.encoder().in_range(&subresource_range));

        TrackedImageView {
            handle,
            image,
            subresource_range,
            depth_sliced,
        }
    }

    /// Returns the raw image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    /// Returns the image the view was created from.
    #[inline]
    pub fn image(&self) -> &Arc<TrackedImage> {
        &self.image
    }

    /// Returns the subresources the view addresses. For a depth-sliced view,
    /// the layer range selects depth slices.
    #[inline]
    pub fn subresource_range(&self) -> &SubresourceRange {
        &self.subresource_range
    }

    /// Returns whether the view addresses depth slices of a 3D image rather
    /// than array layers.
    #[inline]
    pub fn is_depth_sliced(&self) -> bool {
        self.depth_sliced
    }
}

/// An image, or a view restricting it to a subset of its subresources.
///
/// Layout verification is written against this trait so that commands taking
/// either kind of reference share one code path.
pub trait ImageResource {
    /// Returns the underlying image.
    fn image(&self) -> &Arc<TrackedImage>;

    /// Returns the subresources this resource addresses.
    fn subresource_range(&self) -> SubresourceRange;
}

impl ImageResource for Arc<TrackedImage> {
    #[inline]
    fn image(&self) -> &Arc<TrackedImage> {
        self
    }

    #[inline]
    fn subresource_range(&self) -> SubresourceRange {
        TrackedImage::subresource_range(self)
    }
}

impl ImageResource for TrackedImageView {
    #[inline]
    fn image(&self) -> &Arc<TrackedImage> {
        self.image()
    }

    #[inline]
    fn subresource_range(&self) -> SubresourceRange {
        self.subresource_range.clone()
    }
}
