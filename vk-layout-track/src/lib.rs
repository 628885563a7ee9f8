//! Subresource-granular image layout tracking for Vulkan.
//!
//! Every Vulkan image subresource is in an implementation-defined *layout* at
//! any point in time, and most commands require their image arguments to be
//! in a specific layout when the command executes on the device. Getting this
//! wrong is undefined behavior that commonly works on one driver and breaks
//! on another. This crate shadows the layout of every tracked subresource and
//! reports the mismatches, without talking to the driver at all.
//!
//! # Tracking model
//!
//! The crate maintains two levels of state:
//!
//! - Each [`TrackedImage`](image::TrackedImage) carries the *committed*
//!   layout of its subresources: the layout they are in once all submitted
//!   work has executed. The map starts out entirely
//!   [`vk::ImageLayout::UNDEFINED`].
//! - Each [`CommandBufferLayoutState`](overlay::CommandBufferLayoutState)
//!   carries, per image the command buffer touches, the layout the command
//!   buffer *expects on entry* and the layout its recorded transitions
//!   produce. Command buffers are recorded long before they execute, so
//!   these overlays cannot be folded into the image state at record time.
//!
//! Subresources are mapped to a dense index space by a
//! [`SubresourceEncoder`](subresource::SubresourceEncoder), and both levels
//! of state are stored in coalescing [`RangeMap`](range_map::RangeMap)s over
//! that space, so an image with thousands of subresources in the same layout
//! costs one entry.
//!
//! # Record time
//!
//! While a command buffer is recording, calls like
//! [`set_layout`](overlay::CommandBufferLayoutState::set_layout),
//! [`record_barrier`](overlay::CommandBufferLayoutState::record_barrier) and
//! [`begin_render_pass`](overlay::CommandBufferLayoutState::begin_render_pass)
//! update its overlays, and the `verify_*` functions in [`verify`] check a
//! command's required layout against what the overlay already knows. A
//! mismatch at this level means the command buffer is inconsistent with
//! itself.
//!
//! # Submit time
//!
//! When command buffers are submitted,
//! [`validate_submit_layouts`](verify::validate_submit_layouts) checks each
//! command buffer's entry expectations against the committed image state,
//! with the effects of the submission's earlier command buffers projected
//! over it, and [`commit_submit_layouts`](verify::commit_submit_layouts)
//! folds the overlays' final layouts back into the images. Mismatches are
//! collected into [`Diagnostics`] rather than returned as errors; layout
//! validation never has to abort the work it is checking.

pub use ash::vk::Handle;

pub mod image;
pub mod overlay;
pub mod range_map;
pub mod subresource;
pub mod verify;

use crate::subresource::Subresource;
use ash::vk;
use std::fmt::{Display, Error as FmtError, Formatter};

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. In order to construct
/// it, use one of the methods or constants on the struct that contains it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

/// The Vulkan command, and optionally the parameter within it, that a
/// diagnostic refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    function: &'static str,
    parameter: Option<&'static str>,
}

impl Location {
    /// Returns a `Location` naming `function`.
    #[inline]
    pub const fn new(function: &'static str) -> Self {
        Location {
            function,
            parameter: None,
        }
    }

    /// Returns the location with the parameter set to `parameter`.
    #[inline]
    #[must_use]
    pub const fn with_parameter(mut self, parameter: &'static str) -> Self {
        self.parameter = Some(parameter);
        self
    }

    /// Returns the function name.
    #[inline]
    pub const fn function(&self) -> &'static str {
        self.function
    }

    /// Returns the parameter name, if one is set.
    #[inline]
    pub const fn parameter(&self) -> Option<&'static str> {
        self.parameter
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.function)?;

        if let Some(parameter) = self.parameter {
            write!(f, "({})", parameter)?;
        }

        Ok(())
    }
}

/// Where the conflicting layout in a [`LayoutMismatch`] was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutProvenance {
    /// The layout is established fact: a transition recorded earlier in the
    /// same command buffer, or the committed layout the subresource holds
    /// when the checked work executes.
    PreviouslyKnown,

    /// The layout is what an earlier use in the same command buffer assumed
    /// the subresource to already be in.
    PreviouslyUsed,
}

/// A use of an image subresource in a layout it will not be in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutMismatch {
    /// A stable identifier for the kind of mismatch.
    pub ident: &'static str,

    /// The command the requirement comes from.
    pub location: Location,

    /// The command buffer involved, if the mismatch was found while
    /// validating one.
    pub command_buffer: Option<vk::CommandBuffer>,

    /// The image involved.
    pub image: vk::Image,

    /// The first mismatching subresource.
    pub subresource: Subresource,

    /// The layout the command requires.
    pub expected_layout: vk::ImageLayout,

    /// The layout the subresource will actually be in.
    pub found_layout: vk::ImageLayout,

    /// Where `found_layout` was established.
    pub provenance: LayoutProvenance,
}

impl Display for LayoutMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}: ", self.location)?;

        if let Some(command_buffer) = self.command_buffer {
            write!(f, "command buffer {:?}: ", command_buffer)?;
        }

        write!(
            f,
            "image {:?} subresource (aspect {:?}, mip level {}, array layer {}) \
            is expected to be in layout {:?}, but ",
            self.image,
            self.subresource.aspect,
            self.subresource.mip_level,
            self.subresource.array_layer,
            self.expected_layout,
        )?;

        match self.provenance {
            LayoutProvenance::PreviouslyKnown => {
                write!(f, "its layout at that point is {:?}", self.found_layout)?
            }
            LayoutProvenance::PreviouslyUsed => write!(
                f,
                "an earlier command in this command buffer already used it in layout {:?}",
                self.found_layout,
            )?,
        }

        write!(f, " [{}]", self.ident)
    }
}

/// A collection of layout mismatches found by a validation pass.
///
/// Validation functions append to this and keep going, so one pass reports
/// everything it finds. The caller decides what to do with the findings;
/// reporting a mismatch never prevents the state tracking from proceeding.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    findings: Vec<LayoutMismatch>,
}

impl Diagnostics {
    /// Returns an empty `Diagnostics`.
    #[inline]
    pub const fn new() -> Self {
        Diagnostics {
            findings: Vec::new(),
        }
    }

    /// Adds a finding.
    #[inline]
    pub fn push(&mut self, mismatch: LayoutMismatch) {
        self.findings.push(mismatch);
    }

    /// Returns whether no mismatches were found.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns the number of mismatches found.
    #[inline]
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Returns the findings in the order they were found.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &LayoutMismatch> + '_ {
        self.findings.iter()
    }

    /// Removes and returns all findings.
    #[inline]
    pub fn drain(&mut self) -> impl ExactSizeIterator<Item = LayoutMismatch> + '_ {
        self.findings.drain(..)
    }

    /// Discards all findings.
    #[inline]
    pub fn clear(&mut self) {
        self.findings.clear();
    }
}

impl IntoIterator for Diagnostics {
    type Item = LayoutMismatch;
    type IntoIter = std::vec::IntoIter<LayoutMismatch>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.findings.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a LayoutMismatch;
    type IntoIter = std::slice::Iter<'a, LayoutMismatch>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.findings.iter()
    }
}
