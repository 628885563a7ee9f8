//! Per-command-buffer layout state.
//!
//! While a command buffer is recording, every image it touches gets an
//! overlay map: a [`RangeMap`] over the image's subresource indices holding
//! what the command buffer knows about each subresource's layout. Two facts
//! are tracked per subresource:
//!
//! - The *first* layout: the layout the subresource is expected to already be
//!   in when the command buffer begins executing. Recorded once, by whichever
//!   command touches the subresource first.
//! - The *current* layout: the layout the most recent transition recorded in
//!   this command buffer left the subresource in. Unset until a transition is
//!   recorded.
//!
//! Record-time verification reads these overlays; at submit time the first
//! layouts are checked against the image's committed state and the current
//! layouts are committed back. See the [`verify`](crate::verify) module.

use crate::{
    image::{TrackedImage, TrackedImageView},
    range_map::RangeMap,
    subresource::SubresourceRange,
    NonExhaustive,
};
use ash::vk;
use foldhash::HashMap;
use log::debug;
use std::{collections::hash_map::Entry, ops::Range, sync::Arc};

/// What a command buffer knows about the layout of a run of subresources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutState {
    pub(crate) aspect_mask: vk::ImageAspectFlags,
    pub(crate) first_layout: Option<vk::ImageLayout>,
    pub(crate) current_layout: Option<vk::ImageLayout>,
}

impl LayoutState {
    /// Returns the aspects the first layout was recorded under.
    #[inline]
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    /// Returns the layout the subresources are expected to be in when the
    /// command buffer begins executing, if one was recorded.
    #[inline]
    pub fn first_layout(&self) -> Option<vk::ImageLayout> {
        self.first_layout
    }

    /// Returns the layout the latest recorded transition left the
    /// subresources in, if any transition was recorded.
    #[inline]
    pub fn current_layout(&self) -> Option<vk::ImageLayout> {
        self.current_layout
    }
}

/// The layout overlay of one image within one command buffer.
#[derive(Debug)]
pub struct ImageOverlay {
    image: Arc<TrackedImage>,
    map: RangeMap<LayoutState>,
}

impl ImageOverlay {
    fn new(image: Arc<TrackedImage>) -> Self {
        ImageOverlay {
            image,
            map: RangeMap::new(),
        }
    }

    /// Returns the image this overlay belongs to.
    #[inline]
    pub fn image(&self) -> &Arc<TrackedImage> {
        &self.image
    }

    /// Returns the overlay map, keyed by the image's subresource indices.
    #[inline]
    pub fn map(&self) -> &RangeMap<LayoutState> {
        &self.map
    }
}

/// An image memory barrier, reduced to the parts that affect layout tracking.
#[derive(Clone, Debug)]
pub struct ImageBarrierInfo<'a> {
    /// The image the barrier applies to.
    pub image: &'a Arc<TrackedImage>,

    /// The subresources the barrier applies to.
    ///
    /// The default value covers the whole image.
    pub subresource_range: vk::ImageSubresourceRange,

    /// The layout the subresources are expected to be in before the barrier.
    ///
    /// The default value is [`vk::ImageLayout::UNDEFINED`], which expects
    /// nothing and discards the contents.
    pub old_layout: vk::ImageLayout,

    /// The layout the barrier transitions the subresources to.
    ///
    /// The default value is [`vk::ImageLayout::UNDEFINED`], which must be
    /// overridden.
    pub new_layout: vk::ImageLayout,

    /// The queue family releasing ownership, for a transfer operation.
    ///
    /// The default value is [`vk::QUEUE_FAMILY_IGNORED`].
    pub src_queue_family_index: u32,

    /// The queue family acquiring ownership, for a transfer operation.
    ///
    /// The default value is [`vk::QUEUE_FAMILY_IGNORED`].
    pub dst_queue_family_index: u32,

    pub _ne: NonExhaustive,
}

impl<'a> ImageBarrierInfo<'a> {
    /// Returns a default `ImageBarrierInfo` for `image`.
    #[inline]
    pub const fn new(image: &'a Arc<TrackedImage>) -> Self {
        ImageBarrierInfo {
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::empty(),
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            _ne: NonExhaustive(()),
        }
    }

    /// Returns whether the barrier transfers ownership between two distinct
    /// queue families.
    #[inline]
    pub fn is_queue_family_transfer(&self) -> bool {
        self.src_queue_family_index != self.dst_queue_family_index
            && self.src_queue_family_index != vk::QUEUE_FAMILY_IGNORED
            && self.dst_queue_family_index != vk::QUEUE_FAMILY_IGNORED
    }
}

/// One render pass attachment together with the layout it holds at a given
/// point of the render pass.
#[derive(Clone, Debug)]
pub struct AttachmentLayoutInfo<'a> {
    /// The attachment's image view.
    pub view: &'a TrackedImageView,

    /// The attachment's layout at this point.
    ///
    /// The default value is [`vk::ImageLayout::UNDEFINED`].
    pub layout: vk::ImageLayout,

    /// The attachment's stencil layout at this point, if the render pass
    /// declares a separate one.
    ///
    /// The default value is `None`.
    pub stencil_layout: Option<vk::ImageLayout>,

    pub _ne: NonExhaustive,
}

impl<'a> AttachmentLayoutInfo<'a> {
    /// Returns a default `AttachmentLayoutInfo` for `view`.
    #[inline]
    pub const fn new(view: &'a TrackedImageView) -> Self {
        AttachmentLayoutInfo {
            view,
            layout: vk::ImageLayout::UNDEFINED,
            stencil_layout: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// The layout tracking state of one command buffer.
///
/// Created when the command buffer begins recording and either dropped or
/// [`reset`](Self::reset) when the command buffer is reset. All methods take
/// `&mut self`; recording into one command buffer is single-threaded per the
/// Vulkan external synchronization rules, so no locking happens here.
#[derive(Debug)]
pub struct CommandBufferLayoutState {
    handle: vk::CommandBuffer,
    queue_family_index: u32,
    images: HashMap<vk::Image, ImageOverlay>,
}

impl CommandBufferLayoutState {
    /// Creates empty state for a command buffer allocated from a pool of
    /// `queue_family_index`.
    pub fn new(handle: vk::CommandBuffer, queue_family_index: u32) -> Self {
        CommandBufferLayoutState {
            handle,
            queue_family_index,
            images: HashMap::default(),
        }
    }

    /// Returns the raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Returns the queue family the command buffer records for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the overlay recorded for `image`, or `None` if the command
    /// buffer has not referenced it.
    ///
    /// A leftover overlay for a previous image that happened to use the same
    /// raw handle is treated as absent.
    pub fn overlay(&self, image: &Arc<TrackedImage>) -> Option<&ImageOverlay> {
        self.images
            .get(&image.handle())
            .filter(|overlay| overlay.image.id() == image.id())
    }

    /// Returns all overlays recorded in this command buffer, in no
    /// particular order.
    #[inline]
    pub fn overlays(&self) -> impl Iterator<Item = &ImageOverlay> + '_ {
        self.images.values()
    }

    /// Clears all recorded state, as when the command buffer is reset or
    /// begins re-recording.
    pub fn reset(&mut self) {
        self.images.clear();
    }

    // Looks up or creates the overlay for `image`. An overlay recorded for a
    // destroyed image whose handle was reused is discarded and rebuilt, so
    // stale state is never misattributed to the new image.
    fn overlay_mut(&mut self, image: &Arc<TrackedImage>) -> &mut ImageOverlay {
        match self.images.entry(image.handle()) {
            Entry::Occupied(entry) => {
                let overlay = entry.into_mut();

                if overlay.image.id() != image.id() {
                    debug!(
                        "command buffer {:?}: handle of image {:?} was reused, \
                        discarding layout state recorded for the old image",
                        self.handle,
                        image.handle(),
                    );
                    *overlay = ImageOverlay::new(image.clone());
                }

                overlay
            }
            Entry::Vacant(entry) => entry.insert(ImageOverlay::new(image.clone())),
        }
    }

    /// Records the layout that the subresources in `range` are expected to
    /// already be in when the command buffer executes.
    ///
    /// Only the first recording per subresource takes effect; subresources
    /// that already carry an expectation or a transition keep what they have.
    /// An expectation of [`vk::ImageLayout::UNDEFINED`] constrains nothing.
    ///
    /// `depth_slices`, if given, replaces the layer selection of `range`;
    /// it is used when a render pass binds individual depth slices of a
    /// 2D-array-compatible 3D image as attachment layers.
    ///
    /// # Panics
    ///
    /// - Panics if the (substituted) range is out of bounds for `image`.
    pub fn track_first_layout(
        &mut self,
        image: &Arc<TrackedImage>,
        range: &SubresourceRange,
        depth_slices: Option<Range<u32>>,
        layout: vk::ImageLayout,
    ) {
        let mut range = range.clone();

        if let Some(slices) = depth_slices {
            assert!(image.tracks_depth_slices());
            range.array_layers = slices;
        }

        let encoder = image.encoder();
        assert!(encoder.in_range(&range));

        let state = LayoutState {
            aspect_mask: range.aspects,
            first_layout: Some(layout),
            current_layout: None,
        };

        let overlay = self.overlay_mut(image);

        for index_range in encoder.iter_ranges(range) {
            overlay.map.upsert(index_range, &state, |existing, new| {
                if existing.first_layout.is_none() {
                    existing.first_layout = new.first_layout;
                    existing.aspect_mask = new.aspect_mask;
                }
            });
        }
    }

    /// Records a transition of the subresources in `range` to `new_layout`.
    ///
    /// Every covered subresource has its current layout overwritten. Where no
    /// first-layout expectation has been recorded yet, `assumed_old_layout`
    /// becomes the expectation, if one is given; an expectation already in
    /// place is kept.
    ///
    /// # Panics
    ///
    /// - Panics if `range` is out of bounds for `image`.
    pub fn set_layout(
        &mut self,
        image: &Arc<TrackedImage>,
        range: &SubresourceRange,
        new_layout: vk::ImageLayout,
        assumed_old_layout: Option<vk::ImageLayout>,
    ) {
        let encoder = image.encoder();
        assert!(encoder.in_range(range));

        let state = LayoutState {
            aspect_mask: range.aspects,
            first_layout: assumed_old_layout,
            current_layout: Some(new_layout),
        };

        let overlay = self.overlay_mut(image);

        for index_range in encoder.iter_ranges(range.clone()) {
            overlay.map.upsert(index_range, &state, |existing, new| {
                existing.current_layout = new.current_layout;

                if existing.first_layout.is_none() && new.first_layout.is_some() {
                    existing.first_layout = new.first_layout;
                    existing.aspect_mask = new.aspect_mask;
                }
            });
        }
    }

    /// Records a transition of the subresources of `view` to `layout`.
    ///
    /// If the view covers both depth and stencil and a separate
    /// `stencil_layout` is given, the two aspects are transitioned
    /// separately. For a stencil-only view, `stencil_layout` takes precedence
    /// over `layout` when given.
    pub fn set_view_layout(
        &mut self,
        view: &TrackedImageView,
        layout: vk::ImageLayout,
        stencil_layout: Option<vk::ImageLayout>,
    ) {
        let image = view.image().clone();
        let range = view.subresource_range().clone();
        let depth_and_stencil = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;

        match stencil_layout {
            Some(stencil_layout) if range.aspects == depth_and_stencil => {
                let depth_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::DEPTH,
                    ..range.clone()
                };
                self.set_layout(&image, &depth_range, layout, None);

                let stencil_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::STENCIL,
                    ..range
                };
                self.set_layout(&image, &stencil_range, stencil_layout, None);
            }
            Some(stencil_layout) if range.aspects == vk::ImageAspectFlags::STENCIL => {
                self.set_layout(&image, &range, stencil_layout, None);
            }
            _ => self.set_layout(&image, &range, layout, None),
        }
    }

    /// Records the layout effects of an image memory barrier.
    ///
    /// The release half of a queue family ownership transfer does not
    /// transition anything; it only records the expectation that the
    /// subresources are in `old_layout`, since the acquiring queue performs
    /// the transition. A transfer whose source is an external or foreign
    /// queue family carries no knowable prior layout, so no expectation is
    /// recorded for it.
    ///
    /// Synchronization2 generic layouts are resolved against the barrier's
    /// aspects before being recorded.
    pub fn record_barrier(&mut self, barrier: &ImageBarrierInfo<'_>) {
        let image = barrier.image;
        let range = image.normalize_range(&barrier.subresource_range);

        let mut old_layout =
            crate::verify::normalize_synchronization2_layout(range.aspects, barrier.old_layout);
        let new_layout =
            crate::verify::normalize_synchronization2_layout(range.aspects, barrier.new_layout);

        if barrier.is_queue_family_transfer()
            && (barrier.src_queue_family_index == vk::QUEUE_FAMILY_EXTERNAL
                || barrier.src_queue_family_index == vk::QUEUE_FAMILY_FOREIGN_EXT)
        {
            old_layout = vk::ImageLayout::UNDEFINED;
        }

        let is_release = barrier.is_queue_family_transfer()
            && barrier.src_queue_family_index == self.queue_family_index;

        if is_release {
            self.track_first_layout(image, &range, None, old_layout);
        } else {
            self.set_layout(image, &range, new_layout, Some(old_layout));
        }
    }

    /// Records the layout effects of `vkCmdBeginRenderPass`.
    ///
    /// Each attachment in `attachments` gets its declared initial `layout`
    /// (and `stencil_layout`, if given) as its first-layout expectation. The
    /// attachments in `first_subpass` are then transitioned to their
    /// subpass 0 reference layouts, so in-pass checks see those rather than
    /// the initial layouts. Later subpasses go through
    /// [`next_subpass`](Self::next_subpass).
    pub fn begin_render_pass(
        &mut self,
        attachments: &[AttachmentLayoutInfo<'_>],
        first_subpass: &[AttachmentLayoutInfo<'_>],
    ) {
        for attachment in attachments {
            self.track_view_first_layout(
                attachment.view,
                attachment.layout,
                attachment.stencil_layout,
            );
        }

        self.apply_attachment_layouts(first_subpass);
    }

    /// Records the layout transitions performed when a subpass begins, for
    /// the attachments whose reference layout differs from the previous
    /// subpass.
    pub fn next_subpass(&mut self, attachments: &[AttachmentLayoutInfo<'_>]) {
        self.apply_attachment_layouts(attachments);
    }

    /// Records the transitions to the attachments' final layouts, at
    /// `vkCmdEndRenderPass` time.
    pub fn end_render_pass(&mut self, attachments: &[AttachmentLayoutInfo<'_>]) {
        self.apply_attachment_layouts(attachments);
    }

    fn apply_attachment_layouts(&mut self, attachments: &[AttachmentLayoutInfo<'_>]) {
        for attachment in attachments {
            self.set_view_layout(attachment.view, attachment.layout, attachment.stencil_layout);
        }
    }

    fn track_view_first_layout(
        &mut self,
        view: &TrackedImageView,
        layout: vk::ImageLayout,
        stencil_layout: Option<vk::ImageLayout>,
    ) {
        let image = view.image().clone();
        let range = view.subresource_range().clone();
        let depth_and_stencil = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;

        match stencil_layout {
            Some(stencil_layout) if range.aspects == depth_and_stencil => {
                let depth_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::DEPTH,
                    ..range.clone()
                };
                self.track_first_layout(&image, &depth_range, None, layout);

                let stencil_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::STENCIL,
                    ..range
                };
                self.track_first_layout(&image, &stencil_range, None, stencil_layout);
            }
            Some(stencil_layout) if range.aspects == vk::ImageAspectFlags::STENCIL => {
                self.track_first_layout(&image, &range, None, stencil_layout);
            }
            _ => self.track_first_layout(&image, &range, None, layout),
        }
    }
}
