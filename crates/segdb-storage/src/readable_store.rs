//! The read contract every column-group representation implements.

use segdb_errors::Result;

/// A column-group's read surface, independent of how it physically stores
/// bytes. `id` here is always a segment-local sub-id (already translated
/// out of the table-wide recId space by the caller).
pub trait ReadableStore {
    fn num_rows(&self) -> usize;

    /// Bytes occupied on disk/in memory, including any compression.
    fn data_storage_size(&self) -> usize;

    /// Logical uncompressed size; equal to `data_storage_size` for
    /// representations that don't compress.
    fn data_inflate_size(&self) -> usize;

    /// Appends row `id`'s bytes onto `buf`. Does not consult the segment's
    /// tombstone bitmap — callers check `isDel` before calling this.
    fn get_value_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()>;

    /// `true` if `id` is within the store's populated row range. Does not
    /// imply the row is live (tombstones are tracked separately).
    fn seek_exact(&self, id: u32) -> bool {
        (id as usize) < self.num_rows()
    }

    /// Forward iteration in id order, yielding `(id, bytes)`.
    fn iter_forward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_>;

    /// Reverse of [`Self::iter_forward`].
    fn iter_backward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_>;
}
