// SPDX-License-Identifier: CEPL-1.0
//! Device memory bookkeeping: the memory-type table captured at device
//! selection, and the owned buffer/image records handed out by the
//! transfer engine.

use ash::vk;

/// One entry of the device's memory-type table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub heap_size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
}

/// Immutable snapshot of `VkPhysicalDeviceMemoryProperties`, indexed by
/// memory type index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTypeTable {
    types: Vec<MemoryType>,
}

impl MemoryTypeTable {
    pub fn new(types: Vec<MemoryType>) -> Self {
        Self { types }
    }

    pub fn from_properties(props: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let count = props.memory_type_count as usize;
        let types = props.memory_types[..count]
            .iter()
            .map(|t| MemoryType {
                heap_size: props.memory_heaps[t.heap_index as usize].size,
                properties: t.property_flags,
            })
            .collect();
        Self { types }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&MemoryType> {
        self.types.get(index as usize)
    }

    /// Lowest index whose bit is set in `type_bits` and whose flags are a
    /// superset of `properties`. `None` when no type qualifies.
    pub fn find(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        self.types
            .iter()
            .enumerate()
            .take(32)
            .find(|(i, t)| type_bits & (1 << i) != 0 && t.properties.contains(properties))
            .map(|(i, _)| i as u32)
    }
}

/// A buffer and its dedicated allocation. Owned by whoever requested it and
/// released through [`crate::transfer::TransferEngine::destroy_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    pub handle: vk::Buffer,
    /// Size the caller asked for.
    pub size: vk::DeviceSize,
    pub memory: vk::DeviceMemory,
    /// Size of the backing allocation; never less than `size`.
    pub allocated_size: vk::DeviceSize,
    pub memory_type: u32,
}

/// A 2D single-mip image and its dedicated allocation.
///
/// `layout` tracks the GPU-side layout. Only
/// [`crate::transfer::TransferEngine::transition_image_layout`] changes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Image {
    pub handle: vk::Image,
    pub memory: vk::DeviceMemory,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> MemoryTypeTable {
        MemoryTypeTable::new(
            flags
                .iter()
                .map(|&properties| MemoryType {
                    heap_size: 256 << 20,
                    properties,
                })
                .collect(),
        )
    }

    #[test]
    fn picks_lowest_index_matching_both_conditions() {
        let t = table(&[LOCAL, VISIBLE | COHERENT, LOCAL | VISIBLE | COHERENT]);
        assert_eq!(t.find(0b111, VISIBLE | COHERENT), Some(1));
        assert_eq!(t.find(0b100, VISIBLE | COHERENT), Some(2));
        assert_eq!(t.find(0b111, LOCAL), Some(0));
    }

    #[test]
    fn filter_bit_excludes_an_otherwise_perfect_type() {
        let t = table(&[LOCAL, LOCAL]);
        assert_eq!(t.find(0b10, LOCAL), Some(1));
        assert_eq!(t.find(0b00, LOCAL), None);
    }

    #[test]
    fn requested_flags_must_be_a_subset() {
        let t = table(&[VISIBLE, LOCAL]);
        assert_eq!(t.find(0b11, VISIBLE | COHERENT), None);
    }

    #[test]
    fn empty_request_matches_first_allowed_type() {
        let t = table(&[LOCAL, VISIBLE]);
        assert_eq!(t.find(0b10, vk::MemoryPropertyFlags::empty()), Some(1));
    }

    #[test]
    fn exhaustive_small_tables_agree_with_a_reference_scan() {
        let palette = [LOCAL, VISIBLE, VISIBLE | COHERENT, LOCAL | VISIBLE | COHERENT];
        let wants = [LOCAL, VISIBLE | COHERENT, LOCAL | VISIBLE];
        for a in palette {
            for b in palette {
                for c in palette {
                    let t = table(&[a, b, c]);
                    for mask in 0u32..8 {
                        for want in wants {
                            let reference = [a, b, c]
                                .iter()
                                .enumerate()
                                .position(|(i, f)| mask & (1 << i) != 0 && f.contains(want))
                                .map(|i| i as u32);
                            assert_eq!(t.find(mask, want), reference);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn from_properties_reads_heap_sizes() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_heaps[0].size = 1024;
        props.memory_heaps[1].size = 4096;
        props.memory_types[0] = vk::MemoryType {
            property_flags: LOCAL,
            heap_index: 1,
        };
        props.memory_types[1] = vk::MemoryType {
            property_flags: VISIBLE,
            heap_index: 0,
        };
        let t = MemoryTypeTable::from_properties(&props);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(0).unwrap().heap_size, 4096);
        assert_eq!(t.get(1).unwrap().properties, VISIBLE);
    }
}
