//! Layout checks and submission bookkeeping.
//!
//! The `verify_*` functions check a command's layout requirements against
//! what a recording command buffer already knows, and report violations into
//! a [`Diagnostics`]. Each returns `true` if it reported anything. They
//! never stop at the first finding and never block the operation being
//! checked; recording and submission state stay consistent whether or not
//! mismatches were found.
//!
//! [`validate_submit_layouts`] and [`commit_submit_layouts`] tie the
//! per-command-buffer state back to the images at submission time. They are
//! deliberately separate steps and take the image lock separately, so a
//! racing submission on another thread can interleave between them; Vulkan
//! leaves the image state undefined in that situation anyway, and the split
//! keeps validation off the write lock.

use crate::{
    image::{ImageId, ImageResource, TrackedImage},
    overlay::{AttachmentLayoutInfo, CommandBufferLayoutState, ImageBarrierInfo, LayoutState},
    range_map::RangeMap,
    subresource::SubresourceRange,
    Diagnostics, LayoutMismatch, LayoutProvenance, Location,
};
use ash::vk;
use foldhash::HashMap;
use std::{ops::Range, sync::Arc};

/// Maps a depth-only layout to the combined depth/stencil layout it aliases.
///
/// Other layouts are returned unchanged.
#[inline]
pub fn normalize_depth_layout(layout: vk::ImageLayout) -> vk::ImageLayout {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        layout => layout,
    }
}

/// Maps a stencil-only layout to the combined depth/stencil layout it
/// aliases.
///
/// Other layouts are returned unchanged.
#[inline]
pub fn normalize_stencil_layout(layout: vk::ImageLayout) -> vk::ImageLayout {
    match layout {
        vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        layout => layout,
    }
}

/// Resolves the generic [`vk::ImageLayout::ATTACHMENT_OPTIMAL`] and
/// [`vk::ImageLayout::READ_ONLY_OPTIMAL`] layouts to the specific layout
/// they mean for `aspect_mask`.
///
/// Other layouts, and aspect masks the generic layouts are not defined for,
/// are returned unchanged.
pub fn normalize_synchronization2_layout(
    aspect_mask: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
) -> vk::ImageLayout {
    let depth_and_stencil = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;

    match layout {
        vk::ImageLayout::ATTACHMENT_OPTIMAL => {
            if aspect_mask == vk::ImageAspectFlags::COLOR {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else if aspect_mask == depth_and_stencil {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else if aspect_mask == vk::ImageAspectFlags::DEPTH {
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            } else if aspect_mask == vk::ImageAspectFlags::STENCIL {
                vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL
            } else {
                layout
            }
        }
        vk::ImageLayout::READ_ONLY_OPTIMAL => {
            if aspect_mask == vk::ImageAspectFlags::COLOR {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            } else if aspect_mask == depth_and_stencil {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else if aspect_mask == vk::ImageAspectFlags::DEPTH {
                vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
            } else if aspect_mask == vk::ImageAspectFlags::STENCIL {
                vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL
            } else {
                layout
            }
        }
        layout => layout,
    }
}

/// Returns whether two layouts are interchangeable for a use through
/// `aspect_mask`.
///
/// On top of exact equality, the synchronization2 generic layouts match their
/// resolved forms, and a use that touches only the depth or only the stencil
/// aspect matches across the single-aspect layout and the combined
/// depth/stencil layout, since they address the same data. An empty
/// `aspect_mask` applies none of the relaxations.
pub fn image_layout_matches(
    aspect_mask: vk::ImageAspectFlags,
    expected_layout: vk::ImageLayout,
    found_layout: vk::ImageLayout,
) -> bool {
    if expected_layout == found_layout {
        return true;
    }

    let expected = normalize_synchronization2_layout(aspect_mask, expected_layout);
    let found = normalize_synchronization2_layout(aspect_mask, found_layout);

    if expected == found {
        return true;
    }

    if aspect_mask == vk::ImageAspectFlags::DEPTH {
        normalize_depth_layout(expected) == normalize_depth_layout(found)
    } else if aspect_mask == vk::ImageAspectFlags::STENCIL {
        normalize_stencil_layout(expected) == normalize_stencil_layout(found)
    } else {
        false
    }
}

// Checks one overlay entry against a required layout. Returns the
// conflicting layout and where it came from on a mismatch.
//
// The current layout is authoritative when set. Otherwise the entry's
// first layout is checked; if that fails under the caller's aspect mask,
// it is retried under the mask the entry was recorded with, since an entry
// recorded through a single-aspect use may legitimately hold a single-aspect
// layout that aliases the combined one.
pub(crate) fn check_layout_entry(
    aspect_mask: vk::ImageAspectFlags,
    expected_layout: vk::ImageLayout,
    entry: &LayoutState,
) -> Option<(vk::ImageLayout, LayoutProvenance)> {
    if expected_layout == vk::ImageLayout::UNDEFINED {
        return None;
    }

    if let Some(current) = entry.current_layout {
        if !image_layout_matches(aspect_mask, expected_layout, current) {
            return Some((current, LayoutProvenance::PreviouslyKnown));
        }
    } else if let Some(first) = entry.first_layout {
        if first != vk::ImageLayout::UNDEFINED
            && !image_layout_matches(aspect_mask, expected_layout, first)
            && (aspect_mask == entry.aspect_mask
                || !image_layout_matches(entry.aspect_mask, expected_layout, first))
        {
            return Some((first, LayoutProvenance::PreviouslyUsed));
        }
    }

    None
}

/// Checks that the subresources in `range` will be in `expected_layout` at
/// this point of the command buffer, as far as its recorded state knows.
///
/// Subresources the command buffer has not touched pass; they are checked
/// against the committed image state at submit time instead. An expected
/// layout of [`vk::ImageLayout::UNDEFINED`] checks nothing.
///
/// `aspect_mask` selects the relaxations applied by [`image_layout_matches`];
/// pass the aspects of the accessing image view for view-based uses, or
/// [`vk::ImageAspectFlags::empty`] for an exact check.
///
/// Mismatches are reported to `diagnostics` under `ident`, one finding per
/// conflicting run of subresources. Returns whether any mismatch was found.
///
/// # Panics
///
/// - Panics if `range` is out of bounds for `image`.
#[allow(clippy::too_many_arguments)]
pub fn verify_layout_range(
    cb: &CommandBufferLayoutState,
    image: &Arc<TrackedImage>,
    range: &SubresourceRange,
    aspect_mask: vk::ImageAspectFlags,
    expected_layout: vk::ImageLayout,
    ident: &'static str,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let encoder = image.encoder();
    assert!(encoder.in_range(range));

    let Some(overlay) = cb.overlay(image) else {
        return false;
    };

    let mut mismatch_found = false;

    overlay.map().for_each_overlapping(
        encoder.iter_ranges(range.clone()),
        |index_range, state| {
            let Some(state) = state else {
                return true;
            };

            if let Some((found_layout, provenance)) =
                check_layout_entry(aspect_mask, expected_layout, state)
            {
                mismatch_found = true;
                diagnostics.push(LayoutMismatch {
                    ident,
                    location,
                    command_buffer: Some(cb.handle()),
                    image: image.handle(),
                    subresource: encoder.decode(index_range.start),
                    expected_layout,
                    found_layout,
                    provenance,
                });
            }

            true
        },
    );

    mismatch_found
}

/// Checks a raw subresource range against `expected_layout`.
///
/// The range is resolved against the image first; see
/// [`TrackedImage::normalize_range`]. Otherwise this is
/// [`verify_layout_range`].
#[allow(clippy::too_many_arguments)]
pub fn verify_image_layout(
    cb: &CommandBufferLayoutState,
    image: &Arc<TrackedImage>,
    subresource_range: &vk::ImageSubresourceRange,
    aspect_mask: vk::ImageAspectFlags,
    expected_layout: vk::ImageLayout,
    ident: &'static str,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let range = image.normalize_range(subresource_range);

    verify_layout_range(
        cb,
        image,
        &range,
        aspect_mask,
        expected_layout,
        ident,
        location,
        diagnostics,
    )
}

/// Checks everything `resource` addresses against `expected_layout`.
///
/// The resource's aspects select the relaxations of
/// [`image_layout_matches`], so a depth-only view of a combined
/// depth/stencil image accepts both the single-aspect and the combined
/// layouts. This is the check to use for descriptor accesses, where the
/// shader reaches the image through a view.
pub fn verify_resource_layout(
    cb: &CommandBufferLayoutState,
    resource: &impl ImageResource,
    expected_layout: vk::ImageLayout,
    ident: &'static str,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let range = resource.subresource_range();

    verify_layout_range(
        cb,
        resource.image(),
        &range,
        range.aspects,
        expected_layout,
        ident,
        location,
        diagnostics,
    )
}

/// Checks the destination ranges of a `vkCmdClearColorImage` or
/// `vkCmdClearDepthStencilImage` against the layout the clear declares.
///
/// Reports under `ImageLayout-ClearDstMismatch`.
pub fn verify_clear_layout(
    cb: &CommandBufferLayoutState,
    image: &Arc<TrackedImage>,
    ranges: &[vk::ImageSubresourceRange],
    clear_layout: vk::ImageLayout,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut mismatch_found = false;

    for subresource_range in ranges {
        mismatch_found |= verify_image_layout(
            cb,
            image,
            subresource_range,
            vk::ImageAspectFlags::empty(),
            clear_layout,
            "ImageLayout-ClearDstMismatch",
            location,
            diagnostics,
        );
    }

    mismatch_found
}

/// Checks that an image memory barrier's `old_layout` agrees with the layout
/// the command buffer has recorded for the barrier's subresources.
///
/// An `old_layout` of [`vk::ImageLayout::UNDEFINED`] checks nothing, and the
/// acquire half of an ownership transfer from an external or foreign queue
/// family is not checked at all, since the releasing side is not visible to
/// this instance. Reports under `ImageLayout-BarrierOldMismatch`.
pub fn verify_barrier_layouts(
    cb: &CommandBufferLayoutState,
    barrier: &ImageBarrierInfo<'_>,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    if barrier.old_layout == vk::ImageLayout::UNDEFINED {
        return false;
    }

    let is_acquire_from_external = barrier.is_queue_family_transfer()
        && barrier.dst_queue_family_index == cb.queue_family_index()
        && (barrier.src_queue_family_index == vk::QUEUE_FAMILY_EXTERNAL
            || barrier.src_queue_family_index == vk::QUEUE_FAMILY_FOREIGN_EXT);

    if is_acquire_from_external {
        return false;
    }

    let range = barrier.image.normalize_range(&barrier.subresource_range);
    let old_layout = normalize_synchronization2_layout(range.aspects, barrier.old_layout);

    verify_layout_range(
        cb,
        barrier.image,
        &range,
        vk::ImageAspectFlags::empty(),
        old_layout,
        "ImageLayout-BarrierOldMismatch",
        location,
        diagnostics,
    )
}

/// Checks that the initial layouts declared by a render pass instance agree
/// with the layouts the command buffer has recorded for the attachments.
///
/// Call at `vkCmdBeginRenderPass` time, before
/// [`CommandBufferLayoutState::begin_render_pass`] records the attachments.
/// Reports under `ImageLayout-RenderPassInitialMismatch`.
pub fn verify_render_pass_layouts(
    cb: &CommandBufferLayoutState,
    attachments: &[AttachmentLayoutInfo<'_>],
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut mismatch_found = false;

    for attachment in attachments {
        let view = attachment.view;
        let image = view.image();
        let range = view.subresource_range();
        let depth_and_stencil = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;

        let mut check = |range: &SubresourceRange, layout| {
            verify_layout_range(
                cb,
                image,
                range,
                range.aspects,
                layout,
                "ImageLayout-RenderPassInitialMismatch",
                location,
                diagnostics,
            )
        };

        match attachment.stencil_layout {
            Some(stencil_layout) if range.aspects == depth_and_stencil => {
                let depth_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::DEPTH,
                    ..range.clone()
                };
                mismatch_found |= check(&depth_range, attachment.layout);

                let stencil_range = SubresourceRange {
                    aspects: vk::ImageAspectFlags::STENCIL,
                    ..range.clone()
                };
                mismatch_found |= check(&stencil_range, stencil_layout);
            }
            Some(stencil_layout) if range.aspects == vk::ImageAspectFlags::STENCIL => {
                mismatch_found |= check(range, stencil_layout);
            }
            _ => mismatch_found |= check(range, attachment.layout),
        }
    }

    mismatch_found
}

/// Checks a host copy's subresource range directly against the image's
/// committed layouts.
///
/// Host copies execute immediately rather than through a command buffer, so
/// there is no recorded state to consult; the committed state is current by
/// the time the call is legal. Subresources without a committed layout pass.
/// Reports under `ImageLayout-HostCopyMismatch`.
pub fn verify_host_copy_layout(
    image: &Arc<TrackedImage>,
    subresource_range: &vk::ImageSubresourceRange,
    expected_layout: vk::ImageLayout,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    if expected_layout == vk::ImageLayout::UNDEFINED {
        return false;
    }

    let range = image.normalize_range(subresource_range);
    let encoder = image.encoder();
    let map = image.layout_map().read();
    let mut mismatch_found = false;

    map.for_each_overlapping(encoder.iter_ranges(range.clone()), |index_range, layout| {
        let Some(&found_layout) = layout else {
            return true;
        };

        if found_layout != vk::ImageLayout::UNDEFINED
            && !image_layout_matches(range.aspects, expected_layout, found_layout)
        {
            mismatch_found = true;
            diagnostics.push(LayoutMismatch {
                ident: "ImageLayout-HostCopyMismatch",
                location,
                command_buffer: None,
                image: image.handle(),
                subresource: encoder.decode(index_range.start),
                expected_layout,
                found_layout,
                provenance: LayoutProvenance::PreviouslyKnown,
            });
        }

        true
    });

    mismatch_found
}

/// Applies a host-side layout transition, `vkTransitionImageLayoutEXT`
/// style.
///
/// `old_layout` is checked against the committed state the same way
/// [`verify_host_copy_layout`] checks an expected layout, reporting under
/// `ImageLayout-HostTransitionMismatch`; then `new_layout` is committed over
/// the range regardless, matching what the driver does. Returns whether the
/// old layout conflicted with the committed state.
pub fn host_transition_layout(
    image: &Arc<TrackedImage>,
    subresource_range: &vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let range = image.normalize_range(subresource_range);
    let encoder = image.encoder();
    let mut mismatch_found = false;

    if old_layout != vk::ImageLayout::UNDEFINED {
        let map = image.layout_map().read();

        map.for_each_overlapping(encoder.iter_ranges(range.clone()), |index_range, layout| {
            let Some(&found_layout) = layout else {
                return true;
            };

            if found_layout != vk::ImageLayout::UNDEFINED
                && !image_layout_matches(range.aspects, old_layout, found_layout)
            {
                mismatch_found = true;
                diagnostics.push(LayoutMismatch {
                    ident: "ImageLayout-HostTransitionMismatch",
                    location,
                    command_buffer: None,
                    image: image.handle(),
                    subresource: encoder.decode(index_range.start),
                    expected_layout: old_layout,
                    found_layout,
                    provenance: LayoutProvenance::PreviouslyKnown,
                });
            }

            true
        });
    }

    let mut map = image.layout_map().write();

    for index_range in encoder.iter_ranges(range) {
        map.insert(index_range, new_layout);
    }

    mismatch_found
}

/// Scratch state for validating one submission.
///
/// Holds the layouts that the already-validated command buffers of the
/// submission will leave behind, so that a later command buffer in the same
/// submission is checked against its predecessors' results rather than
/// against state from before the submission. Reusable across submissions via
/// [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct LayoutScratch {
    images: HashMap<ImageId, RangeMap<vk::ImageLayout>>,
}

impl LayoutScratch {
    /// Returns an empty `LayoutScratch`.
    pub fn new() -> Self {
        LayoutScratch {
            images: HashMap::default(),
        }
    }

    /// Clears the projected state for reuse with the next submission.
    pub fn clear(&mut self) {
        self.images.clear();
    }
}

/// Checks one command buffer of a submission against the layouts its images
/// will be in when it executes.
///
/// Every entry expectation the command buffer recorded is compared against
/// the image's committed layout, with the layouts projected into `scratch`
/// by this submission's earlier command buffers taking precedence. The
/// command buffer's own resulting layouts are then projected into `scratch`
/// in turn. Call once per command buffer, in submission order, with one
/// `scratch` per submission.
///
/// Expectations of [`vk::ImageLayout::UNDEFINED`] and subresources with no
/// committed layout always pass. Mismatches are reported under
/// `ImageLayout-SubmitMismatch`; `location` should name the submitting
/// command. Returns whether any mismatch was found.
pub fn validate_submit_layouts(
    scratch: &mut LayoutScratch,
    cb: &CommandBufferLayoutState,
    location: Location,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut mismatch_found = false;

    for overlay in cb.overlays() {
        let image = overlay.image();
        let encoder = image.encoder();
        let global = image.layout_map().read();
        let projected = scratch.images.get(&image.id());

        for (index_range, state) in overlay.map().iter() {
            let Some(first_layout) = state.first_layout else {
                continue;
            };

            if first_layout == vk::ImageLayout::UNDEFINED {
                continue;
            }

            committed_pieces(projected, &global, index_range, |piece, committed| {
                if committed == vk::ImageLayout::UNDEFINED {
                    return;
                }

                if !image_layout_matches(state.aspect_mask, first_layout, committed) {
                    mismatch_found = true;
                    diagnostics.push(LayoutMismatch {
                        ident: "ImageLayout-SubmitMismatch",
                        location,
                        command_buffer: Some(cb.handle()),
                        image: image.handle(),
                        subresource: encoder.decode(piece.start),
                        expected_layout: first_layout,
                        found_layout: committed,
                        provenance: LayoutProvenance::PreviouslyKnown,
                    });
                }
            });
        }
    }

    for overlay in cb.overlays() {
        if overlay
            .map()
            .iter()
            .any(|(_, state)| state.current_layout.is_some())
        {
            let projected = scratch.images.entry(overlay.image().id()).or_default();
            projected.splice(overlay.map(), |state| state.current_layout);
        }
    }

    mismatch_found
}

/// Folds a submitted command buffer's resulting layouts into its images'
/// committed state.
///
/// Call once per command buffer after the submission is accepted, in
/// submission order. Only subresources the command buffer actually
/// transitioned are written; an overlay holding nothing but entry
/// expectations does not take the write lock at all. Committing the same
/// state twice is a no-op.
///
/// Returns whether any committed layout changed.
pub fn commit_submit_layouts(cb: &CommandBufferLayoutState) -> bool {
    let mut changed = false;

    for overlay in cb.overlays() {
        if overlay
            .map()
            .iter()
            .any(|(_, state)| state.current_layout.is_some())
        {
            let mut map = overlay.image().layout_map().write();
            changed |= map.splice(overlay.map(), |state| state.current_layout);
        }
    }

    changed
}

// Walks the committed layout of `span`, with `projected` state overriding
// `global`. Pieces with no entry in either map are reported as `UNDEFINED`.
fn committed_pieces(
    projected: Option<&RangeMap<vk::ImageLayout>>,
    global: &RangeMap<vk::ImageLayout>,
    span: Range<u32>,
    mut piece: impl FnMut(Range<u32>, vk::ImageLayout),
) {
    let mut cursor = span.start;

    while cursor < span.end {
        if let Some((range, &layout)) = projected.and_then(|map| map.get_key_value(cursor)) {
            let end = range.end.min(span.end);
            piece(cursor..end, layout);
            cursor = end;
            continue;
        }

        // Nothing projected at the cursor; global state applies until the
        // next projected entry begins.
        let bound = projected
            .and_then(|map| map.range(cursor..span.end).next())
            .map_or(span.end, |(range, _)| range.start);

        match global.get_key_value(cursor) {
            Some((range, &layout)) => {
                let end = range.end.min(bound);
                piece(cursor..end, layout);
                cursor = end;
            }
            None => {
                let end = global
                    .range(cursor..bound)
                    .next()
                    .map_or(bound, |(range, _)| range.start);
                piece(cursor..end, vk::ImageLayout::UNDEFINED);
                cursor = end;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{ImageInfo, ImageViewInfo, TrackedImageView},
        subresource::Subresource,
    };
    use ash::vk::Handle;

    fn image(
        handle: u64,
        format: vk::Format,
        mip_levels: u32,
        array_layers: u32,
    ) -> Arc<TrackedImage> {
        Arc::new(TrackedImage::new(
            vk::Image::from_raw(handle),
            ImageInfo {
                format,
                extent: [64, 64, 1],
                mip_levels,
                array_layers,
                ..Default::default()
            },
        ))
    }

    fn cb(handle: u64) -> CommandBufferLayoutState {
        CommandBufferLayoutState::new(vk::CommandBuffer::from_raw(handle), 0)
    }

    fn loc() -> Location {
        Location::new("vkCmdCopyImage")
    }

    fn whole() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::empty(),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    #[test]
    fn depth_and_stencil_normalization() {
        assert_eq!(
            normalize_depth_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(
            normalize_depth_layout(vk::ImageLayout::GENERAL),
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(
            normalize_stencil_layout(vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        );
    }

    #[test]
    fn synchronization2_normalization() {
        assert_eq!(
            normalize_synchronization2_layout(
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::ATTACHMENT_OPTIMAL,
            ),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(
            normalize_synchronization2_layout(
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                vk::ImageLayout::READ_ONLY_OPTIMAL,
            ),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        );
        assert_eq!(
            normalize_synchronization2_layout(
                vk::ImageAspectFlags::STENCIL,
                vk::ImageLayout::ATTACHMENT_OPTIMAL,
            ),
            vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL,
        );
        // Not a generic layout: passes through untouched.
        assert_eq!(
            normalize_synchronization2_layout(
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
    }

    #[test]
    fn layout_matching_relaxations() {
        // Exact match always passes.
        assert!(image_layout_matches(
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::GENERAL,
        ));

        // Depth-only access matches across the aliasing layouts.
        assert!(image_layout_matches(
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ));
        assert!(image_layout_matches(
            vk::ImageAspectFlags::STENCIL,
            vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ));

        // Access through both aspects gets no relaxation.
        assert!(!image_layout_matches(
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ));

        // The generic layout matches its resolved form.
        assert!(image_layout_matches(
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::ATTACHMENT_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ));
    }

    #[test]
    fn untouched_image_passes() {
        let image = image(0x101, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        assert!(!verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn verify_against_current_layout() {
        let image = image(0x102, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.record_barrier(&ImageBarrierInfo {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ..ImageBarrierInfo::new(&image)
        });

        assert!(!verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());

        assert!(verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert_eq!(diagnostics.len(), 1);

        let mismatch = diagnostics.iter().next().unwrap();
        assert_eq!(mismatch.ident, "ImageLayout-RecordMismatch");
        assert_eq!(mismatch.command_buffer, Some(cb.handle()));
        assert_eq!(
            mismatch.expected_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(mismatch.found_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        // The conflict is with a transition this command buffer recorded.
        assert_eq!(mismatch.provenance, LayoutProvenance::PreviouslyKnown);
    }

    #[test]
    fn verify_against_first_layout() {
        let image = image(0x103, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::GENERAL,
        );

        assert!(verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));

        let mismatch = diagnostics.iter().next().unwrap();
        assert_eq!(mismatch.found_layout, vk::ImageLayout::GENERAL);
        // The conflict is with an assumption, not a recorded transition.
        assert_eq!(mismatch.provenance, LayoutProvenance::PreviouslyUsed);
    }

    #[test]
    fn expected_undefined_checks_nothing() {
        let image = image(0x104, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::GENERAL,
        );

        assert!(!verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::UNDEFINED,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn first_layout_rechecked_under_recorded_aspects() {
        let image = image(0x105, vk::Format::D24_UNORM_S8_UINT, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        // Depth-aspect use recorded the single-aspect alias.
        cb.track_first_layout(
            &image,
            &SubresourceRange {
                aspects: vk::ImageAspectFlags::DEPTH,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            None,
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
        );

        // A strict check for the combined layout still passes, because the
        // entry was recorded through the depth aspect alone.
        assert!(!verify_layout_range(
            &cb,
            &image,
            &SubresourceRange {
                aspects: vk::ImageAspectFlags::DEPTH,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());

        // A genuinely different layout still fails.
        assert!(verify_layout_range(
            &cb,
            &image,
            &SubresourceRange {
                aspects: vk::ImageAspectFlags::DEPTH,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn resource_check_uses_view_aspects() {
        let image = image(0x113, vk::Format::D32_SFLOAT_S8_UINT, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            None,
        );

        // A depth-only view accepts the combined layout for a depth read.
        let view = TrackedImageView::new(
            vk::ImageView::from_raw(0x61),
            image.clone(),
            ImageViewInfo {
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            },
        );
        assert!(!verify_resource_layout(
            &cb,
            &view,
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());

        // The image as a whole does not.
        assert!(verify_resource_layout(
            &cb,
            &image,
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn all_mismatches_are_reported() {
        let image = image(0x106, vk::Format::R8G8B8A8_UNORM, 4, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        // Mips 0 and 2 in conflicting layouts, 1 and 3 matching.
        for (mip, layout) in [
            (0, vk::ImageLayout::GENERAL),
            (1, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            (2, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            (3, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
        ] {
            cb.set_layout(
                &image,
                &SubresourceRange {
                    aspects: vk::ImageAspectFlags::COLOR,
                    mip_levels: mip..mip + 1,
                    array_layers: 0..1,
                },
                layout,
                None,
            );
        }

        assert!(verify_image_layout(
            &cb,
            &image,
            &whole(),
            vk::ImageAspectFlags::empty(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            "ImageLayout-RecordMismatch",
            loc(),
            &mut diagnostics,
        ));

        assert_eq!(diagnostics.len(), 2);
        let mips: Vec<_> = diagnostics
            .iter()
            .map(|mismatch| mismatch.subresource.mip_level)
            .collect();
        assert_eq!(mips, vec![0, 2]);
    }

    #[test]
    fn barrier_old_layout_is_checked() {
        let image = image(0x107, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            None,
        );

        let good = ImageBarrierInfo {
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ..ImageBarrierInfo::new(&image)
        };
        assert!(!verify_barrier_layouts(&cb, &good, loc(), &mut diagnostics));

        let bad = ImageBarrierInfo {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ..good.clone()
        };
        assert!(verify_barrier_layouts(&cb, &bad, loc(), &mut diagnostics));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().ident,
            "ImageLayout-BarrierOldMismatch",
        );
    }

    #[test]
    fn external_acquire_is_not_checked() {
        let image = image(0x108, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::GENERAL,
            None,
        );

        let barrier = ImageBarrierInfo {
            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_queue_family_index: vk::QUEUE_FAMILY_EXTERNAL,
            dst_queue_family_index: 0,
            ..ImageBarrierInfo::new(&image)
        };
        assert!(!verify_barrier_layouts(&cb, &barrier, loc(), &mut diagnostics));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn render_pass_initial_layouts_are_checked() {
        let image = image(0x109, vk::Format::D24_UNORM_S8_UINT, 1, 1);
        let view = TrackedImageView::new(
            vk::ImageView::from_raw(0x60),
            image.clone(),
            ImageViewInfo::default(),
        );
        let mut cb = cb(0x1);
        let mut diagnostics = Diagnostics::new();

        cb.set_view_layout(
            &view,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Some(vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL),
        );

        // Depth matches; the declared stencil initial layout does not.
        let attachments = [AttachmentLayoutInfo {
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            stencil_layout: Some(vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL),
            ..AttachmentLayoutInfo::new(&view)
        }];
        assert!(verify_render_pass_layouts(
            &cb,
            &attachments,
            Location::new("vkCmdBeginRenderPass"),
            &mut diagnostics,
        ));

        assert_eq!(diagnostics.len(), 1);
        let mismatch = diagnostics.iter().next().unwrap();
        assert_eq!(mismatch.ident, "ImageLayout-RenderPassInitialMismatch");
        assert_eq!(mismatch.subresource.aspect, vk::ImageAspectFlags::STENCIL);
    }

    #[test]
    fn submit_validation_passes_on_uncommitted_image() {
        let image = image(0x10a, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut cb = cb(0x1);
        let mut scratch = LayoutScratch::new();
        let mut diagnostics = Diagnostics::new();

        cb.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        // Nothing has been committed, so there is nothing to contradict.
        assert!(!validate_submit_layouts(
            &mut scratch,
            &cb,
            Location::new("vkQueueSubmit"),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn submit_validation_checks_committed_state() {
        let image = image(0x10b, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut diagnostics = Diagnostics::new();

        // First submission leaves the image in SHADER_READ_ONLY_OPTIMAL.
        let mut first = cb(0x1);
        first.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Some(vk::ImageLayout::UNDEFINED),
        );
        let mut scratch = LayoutScratch::new();
        assert!(!validate_submit_layouts(
            &mut scratch,
            &first,
            Location::new("vkQueueSubmit"),
            &mut diagnostics,
        ));
        assert!(commit_submit_layouts(&first));

        // A second submission expecting that layout passes.
        let mut second = cb(0x2);
        second.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        scratch.clear();
        assert!(!validate_submit_layouts(
            &mut scratch,
            &second,
            Location::new("vkQueueSubmit"),
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());

        // One expecting something else does not.
        let mut third = cb(0x3);
        third.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        scratch.clear();
        assert!(validate_submit_layouts(
            &mut scratch,
            &third,
            Location::new("vkQueueSubmit"),
            &mut diagnostics,
        ));

        assert_eq!(diagnostics.len(), 1);
        let mismatch = diagnostics.iter().next().unwrap();
        assert_eq!(mismatch.ident, "ImageLayout-SubmitMismatch");
        assert_eq!(mismatch.expected_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(
            mismatch.found_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(mismatch.provenance, LayoutProvenance::PreviouslyKnown);
    }

    #[test]
    fn scratch_projects_earlier_command_buffers() {
        let image = image(0x10c, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut scratch = LayoutScratch::new();
        let mut diagnostics = Diagnostics::new();

        let mut producer = cb(0x1);
        producer.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Some(vk::ImageLayout::UNDEFINED),
        );

        let mut consumer = cb(0x2);
        consumer.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        // Nothing was ever committed, but within the submission the
        // producer's result satisfies the consumer's expectation.
        let submit = Location::new("vkQueueSubmit");
        assert!(!validate_submit_layouts(&mut scratch, &producer, submit, &mut diagnostics));
        assert!(!validate_submit_layouts(&mut scratch, &consumer, submit, &mut diagnostics));
        assert!(diagnostics.is_empty());

        // A consumer expecting a different layout is told what the producer
        // actually left behind, before anything was committed.
        let mut wrong = cb(0x3);
        wrong.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::GENERAL,
        );
        assert!(validate_submit_layouts(&mut scratch, &wrong, submit, &mut diagnostics));
        assert_eq!(
            diagnostics.iter().next().unwrap().found_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    }

    #[test]
    fn commit_is_idempotent_and_reports_change() {
        let image = image(0x10d, vk::Format::R8G8B8A8_UNORM, 1, 1);

        let mut cb = cb(0x1);
        cb.set_layout(
            &image,
            &image.subresource_range(),
            vk::ImageLayout::GENERAL,
            None,
        );

        assert!(commit_submit_layouts(&cb));
        // Same state again: no change.
        assert!(!commit_submit_layouts(&cb));
        assert_eq!(
            image.committed_layout(Subresource {
                aspect: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            }),
            Some(vk::ImageLayout::GENERAL),
        );
    }

    #[test]
    fn commit_skips_read_only_use() {
        let image = image(0x10e, vk::Format::R8G8B8A8_UNORM, 1, 1);

        let mut cb = cb(0x1);
        cb.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        assert!(!commit_submit_layouts(&cb));
        assert_eq!(
            image.committed_layout(Subresource {
                aspect: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            }),
            None,
        );
    }

    #[test]
    fn partial_commit_leaves_other_subresources_alone() {
        let image = image(0x10f, vk::Format::R8G8B8A8_UNORM, 3, 1);

        let mut cb = cb(0x1);
        cb.set_layout(
            &image,
            &SubresourceRange {
                aspects: vk::ImageAspectFlags::COLOR,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            None,
        );
        assert!(commit_submit_layouts(&cb));

        let at = |mip_level| {
            image.committed_layout(Subresource {
                aspect: vk::ImageAspectFlags::COLOR,
                mip_level,
                array_layer: 0,
            })
        };
        assert_eq!(at(0), Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL));
        assert_eq!(at(1), None);
        assert_eq!(at(2), None);
    }

    #[test]
    fn host_copy_checks_committed_state() {
        let image = image(0x110, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut diagnostics = Diagnostics::new();
        let location = Location::new("vkCopyMemoryToImageEXT");

        // No committed layout yet: passes.
        assert!(!verify_host_copy_layout(
            &image,
            &whole(),
            vk::ImageLayout::GENERAL,
            location,
            &mut diagnostics,
        ));

        assert!(!host_transition_layout(
            &image,
            &whole(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            Location::new("vkTransitionImageLayoutEXT"),
            &mut diagnostics,
        ));

        assert!(!verify_host_copy_layout(
            &image,
            &whole(),
            vk::ImageLayout::GENERAL,
            location,
            &mut diagnostics,
        ));
        assert!(diagnostics.is_empty());

        assert!(verify_host_copy_layout(
            &image,
            &whole(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            location,
            &mut diagnostics,
        ));
        assert_eq!(
            diagnostics.iter().next().unwrap().ident,
            "ImageLayout-HostCopyMismatch",
        );
    }

    #[test]
    fn host_transition_checks_old_layout_but_still_applies() {
        let image = image(0x111, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut diagnostics = Diagnostics::new();
        let location = Location::new("vkTransitionImageLayoutEXT");

        assert!(!host_transition_layout(
            &image,
            &whole(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            location,
            &mut diagnostics,
        ));

        // Wrong old layout is reported, but the new layout still lands.
        assert!(host_transition_layout(
            &image,
            &whole(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            location,
            &mut diagnostics,
        ));
        assert_eq!(
            diagnostics.iter().next().unwrap().ident,
            "ImageLayout-HostTransitionMismatch",
        );
        assert_eq!(
            image.committed_layout(Subresource {
                aspect: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            }),
            Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        );
    }

    #[test]
    fn submit_mismatch_after_clear_of_scratch() {
        // validate and commit for one submission, then reuse the scratch.
        let image = image(0x112, vk::Format::R8G8B8A8_UNORM, 2, 2);
        let mut scratch = LayoutScratch::new();
        let mut diagnostics = Diagnostics::new();
        let submit = Location::new("vkQueueSubmit2");

        let mut first = cb(0x1);
        first.set_layout(
            &image,
            &SubresourceRange {
                aspects: vk::ImageAspectFlags::COLOR,
                mip_levels: 0..1,
                array_layers: 0..2,
            },
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Some(vk::ImageLayout::UNDEFINED),
        );
        assert!(!validate_submit_layouts(&mut scratch, &first, submit, &mut diagnostics));
        commit_submit_layouts(&first);

        // Mip 0 is committed, mip 1 never was. An expectation over the whole
        // image fails only where the committed state contradicts it.
        let mut second = cb(0x2);
        second.track_first_layout(
            &image,
            &image.subresource_range(),
            None,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        scratch.clear();
        assert!(validate_submit_layouts(&mut scratch, &second, submit, &mut diagnostics));

        assert_eq!(diagnostics.len(), 1);
        let mismatch = diagnostics.iter().next().unwrap();
        assert_eq!(mismatch.subresource.mip_level, 0);
        assert_eq!(
            mismatch.found_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
    }
}
