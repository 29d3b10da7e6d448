//! Sliding-window median filter
//!
//! Each channel keeps the last `N` raw readings. On every push the window
//! shifts left, the new reading goes in at the end, a scratch copy is merge
//! sorted and its middle element is returned. The median is also written back
//! over the middle slot of the unsorted window, which pulls the window toward
//! the running median faster than a plain ring would.
//!
//! The window starts zero-filled, so the first `N - 1` outputs lean toward
//! zero.

use crate::{CHANNEL_COUNT, FILTER_WINDOW};

/// Median filter over a fixed, odd-sized window
///
/// No allocation happens after construction; safe to call from the
/// interrupt handler.
#[derive(Debug, Clone)]
pub struct MedianFilter<const N: usize> {
    window: [u16; N],
    scratch: [u16; N],
    merge_buf: [u16; N],
}

impl<const N: usize> MedianFilter<N> {
    const ODD_WINDOW: () = assert!(N % 2 == 1, "median filter window must be odd");

    /// Index of the median in a sorted window
    pub const MIDDLE: usize = (N - 1) / 2;

    /// Create a zero-filled filter
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::ODD_WINDOW;
        Self {
            window: [0; N],
            scratch: [0; N],
            merge_buf: [0; N],
        }
    }

    /// Push a raw reading and return the median of the current window
    ///
    /// # Arguments
    /// * `value` - New raw reading; the oldest reading is discarded
    ///
    /// # Example
    /// ```
    /// use sensornode_core::MedianFilter;
    ///
    /// let mut filter = MedianFilter::<3>::new();
    /// assert_eq!(filter.push_and_filter(100), 0);
    /// assert_eq!(filter.push_and_filter(100), 100);
    /// ```
    pub fn push_and_filter(&mut self, value: u16) -> u16 {
        self.window.copy_within(1.., 0);
        self.window[N - 1] = value;

        self.scratch = self.window;
        merge_sort(&mut self.scratch, &mut self.merge_buf);

        let median = self.scratch[Self::MIDDLE];
        self.window[Self::MIDDLE] = median;
        median
    }

    /// Current (unsorted) window contents, oldest first
    pub fn window(&self) -> &[u16; N] {
        &self.window
    }
}

impl<const N: usize> Default for MedianFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-down merge sort, stable, using `buf` as merge space
fn merge_sort(data: &mut [u16], buf: &mut [u16]) {
    let len = data.len();
    if len < 2 {
        return;
    }
    let mid = len / 2;
    {
        let (left, right) = data.split_at_mut(mid);
        let (left_buf, right_buf) = buf[..len].split_at_mut(mid);
        merge_sort(left, left_buf);
        merge_sort(right, right_buf);
    }

    let (mut i, mut j, mut k) = (0, mid, 0);
    while i < mid && j < len {
        if data[i] <= data[j] {
            buf[k] = data[i];
            i += 1;
        } else {
            buf[k] = data[j];
            j += 1;
        }
        k += 1;
    }
    while i < mid {
        buf[k] = data[i];
        i += 1;
        k += 1;
    }
    while j < len {
        buf[k] = data[j];
        j += 1;
        k += 1;
    }
    data.copy_from_slice(&buf[..len]);
}

/// One median filter per physical channel
#[derive(Debug, Clone, Default)]
pub struct ChannelFilters {
    filters: [MedianFilter<FILTER_WINDOW>; CHANNEL_COUNT],
}

impl ChannelFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter one reading per channel
    pub fn filter(&mut self, raw: [u16; CHANNEL_COUNT]) -> [u16; CHANNEL_COUNT] {
        let mut out = [0u16; CHANNEL_COUNT];
        for ((slot, filter), value) in out.iter_mut().zip(self.filters.iter_mut()).zip(raw) {
            *slot = filter.push_and_filter(value);
        }
        out
    }

    pub fn channel(&self, channel: usize) -> Option<&MedianFilter<FILTER_WINDOW>> {
        self.filters.get(channel)
    }
}
