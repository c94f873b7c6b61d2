//! DWARF structure layout extraction.

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, Operation, Reader, Unit, UnitOffset, UnitSectionOffset,
};

use super::{map_dwarf_error, OwnedDwarf, OwnedReader};
use crate::error::{CrashError, CrashResult};
use crate::types::{FieldKind, FieldLayout, StructLayout};

const MAX_TYPE_REF_DEPTH: usize = 32;

/// Size and kind of a referenced type.
struct TypeShape
{
    size: Option<u64>,
    kind: FieldKind,
}

impl TypeShape
{
    fn opaque() -> Self
    {
        Self {
            size: None,
            kind: FieldKind::Other,
        }
    }
}

type TypeRef<'a> = (&'a Unit<OwnedReader>, UnitOffset<usize>);

pub(crate) struct LayoutExtractor<'a>
{
    dwarf: &'a OwnedDwarf,
    units: &'a [Unit<OwnedReader>],
}

impl<'a> LayoutExtractor<'a>
{
    pub(crate) fn new(dwarf: &'a OwnedDwarf, units: &'a [Unit<OwnedReader>]) -> Self
    {
        Self { dwarf, units }
    }

    pub(crate) fn describe(&self, target: &str) -> CrashResult<Option<StructLayout>>
    {
        for unit in self.units {
            if let Some(layout) = self.describe_in_unit(unit, target)? {
                return Ok(Some(layout));
            }
        }
        Ok(None)
    }

    fn describe_in_unit(&self, unit: &'a Unit<OwnedReader>, target: &str) -> CrashResult<Option<StructLayout>>
    {
        let mut cursor = unit.entries();
        while let Some((_delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
            let tag = entry.tag();
            if !matches!(
                tag,
                constants::DW_TAG_structure_type | constants::DW_TAG_union_type | constants::DW_TAG_typedef
            ) {
                continue;
            }
            if Self::is_declaration(entry)? {
                continue;
            }
            let Some(name) = self.entry_name(unit, entry)? else {
                continue;
            };
            if name != target {
                continue;
            }

            // `typedef struct { ... } uuid_t;` is looked up by the typedef name
            let (body_unit, body_offset) = if tag == constants::DW_TAG_typedef {
                match self.anonymous_aggregate(unit, entry)? {
                    Some(found) => found,
                    None => continue,
                }
            } else {
                (unit, entry.offset())
            };

            let body = body_unit
                .entry(body_offset)
                .map_err(|err| map_dwarf_error("resolving aggregate", err))?;
            let size = Self::entry_byte_size(&body)?.unwrap_or(0);
            let mut layout = StructLayout::new(&name, size);
            self.collect_members(body_unit, body_offset, 0, &mut layout, 0)?;
            tracing::trace!(name = %name, size, fields = layout.fields().count(), "extracted layout from DWARF");
            return Ok(Some(layout));
        }
        Ok(None)
    }

    /// The unnamed struct/union a typedef names, if that is what it names
    fn anonymous_aggregate(
        &self,
        unit: &'a Unit<OwnedReader>,
        typedef: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    ) -> CrashResult<Option<TypeRef<'a>>>
    {
        let Some(value) = Self::type_attr(typedef)? else {
            return Ok(None);
        };
        let Some((unit, offset)) = self.peel(unit, value, 0)? else {
            return Ok(None);
        };
        let die = unit
            .entry(offset)
            .map_err(|err| map_dwarf_error("resolving typedef target", err))?;
        let anonymous = matches!(die.tag(), constants::DW_TAG_structure_type | constants::DW_TAG_union_type)
            && self.entry_name(unit, &die)?.is_none();
        Ok(anonymous.then_some((unit, offset)))
    }

    /// Push the members of the aggregate at `offset` into `layout`
    ///
    /// Anonymous struct/union members are flattened: their fields appear in the
    /// parent at `base` plus their own offset, the way C name lookup sees them.
    fn collect_members(
        &self,
        unit: &'a Unit<OwnedReader>,
        offset: UnitOffset<usize>,
        base: u64,
        layout: &mut StructLayout,
        depth: usize,
    ) -> CrashResult<()>
    {
        let mut tree = unit
            .entries_tree(Some(offset))
            .map_err(|err| map_dwarf_error("building struct tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating struct root", err))?;
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating struct children", err))?
        {
            let entry = child.entry().clone();
            if entry.tag() != constants::DW_TAG_member {
                continue;
            }

            let member_offset = base.saturating_add(Self::member_offset(unit, &entry)?);
            let type_value = entry
                .attr(constants::DW_AT_type)
                .map_err(|err| map_dwarf_error("reading member type", err))?
                .map(|attr| attr.value());

            match self.entry_name(unit, &entry)? {
                Some(name) => {
                    let shape = match type_value {
                        Some(value) => self.shape_of(unit, value, 0)?,
                        None => TypeShape::opaque(),
                    };
                    layout.push_field(FieldLayout::new(name, member_offset, shape.size.unwrap_or(0), shape.kind));
                }
                None => {
                    if depth >= MAX_TYPE_REF_DEPTH {
                        continue;
                    }
                    let Some(value) = type_value else {
                        continue;
                    };
                    if let Some((inner_unit, inner_offset)) = self.peel(unit, value, 0)? {
                        let inner = inner_unit
                            .entry(inner_offset)
                            .map_err(|err| map_dwarf_error("resolving anonymous member", err))?;
                        if matches!(inner.tag(), constants::DW_TAG_structure_type | constants::DW_TAG_union_type) {
                            self.collect_members(inner_unit, inner_offset, member_offset, layout, depth + 1)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn member_offset(unit: &Unit<OwnedReader>, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> CrashResult<u64>
    {
        if let Some(attr) = entry
            .attr(constants::DW_AT_data_bit_offset)
            .map_err(|err| map_dwarf_error("reading DW_AT_data_bit_offset", err))?
        {
            if let Some(bits) = attr.udata_value() {
                return Ok(bits / 8);
            }
        }

        let Some(attr) = entry
            .attr(constants::DW_AT_data_member_location)
            .map_err(|err| map_dwarf_error("reading DW_AT_data_member_location", err))?
        else {
            // union members carry no location
            return Ok(0);
        };

        if let Some(bytes) = attr.udata_value() {
            return Ok(bytes);
        }

        // DWARF 2 producers emit the location as `DW_OP_plus_uconst N`
        if let AttributeValue::Exprloc(expression) = attr.value() {
            let mut operations = expression.operations(unit.encoding());
            if let Ok(Some(Operation::PlusConstant { value })) = operations.next() {
                return Ok(value);
            }
        }

        Err(CrashError::InvalidArgument(
            "unsupported DW_AT_data_member_location expression".to_string(),
        ))
    }

    fn shape_of(&self, unit: &'a Unit<OwnedReader>, value: AttributeValue<OwnedReader>, depth: usize) -> CrashResult<TypeShape>
    {
        if depth >= MAX_TYPE_REF_DEPTH {
            return Ok(TypeShape::opaque());
        }
        let Some((unit, offset)) = self.resolve_ref(unit, value) else {
            return Ok(TypeShape::opaque());
        };

        let die = unit
            .entry(offset)
            .map_err(|err| map_dwarf_error("resolving type reference", err))?;
        let size = Self::entry_byte_size(&die)?;

        let shape = match die.tag() {
            constants::DW_TAG_base_type => TypeShape {
                size,
                kind: Self::base_type_kind(&die)?,
            },
            constants::DW_TAG_enumeration_type => TypeShape {
                size,
                kind: FieldKind::Integer { signed: false },
            },
            constants::DW_TAG_pointer_type => {
                let target = match Self::type_attr(&die)? {
                    Some(pointee) => self.aggregate_name(unit, pointee, depth + 1)?,
                    None => None,
                };
                TypeShape {
                    size: size.or(Some(u64::from(unit.encoding().address_size))),
                    kind: FieldKind::Pointer { target },
                }
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_union_type => TypeShape {
                size,
                kind: self
                    .entry_name(unit, &die)?
                    .map_or(FieldKind::Other, FieldKind::Struct),
            },
            constants::DW_TAG_array_type => {
                let element = match Self::type_attr(&die)? {
                    Some(element) => self.shape_of(unit, element, depth + 1)?,
                    None => TypeShape::opaque(),
                };
                let count = Self::array_count(unit, offset)?;
                TypeShape {
                    size: size.or_else(|| element.size.map(|each| each.saturating_mul(count))),
                    kind: FieldKind::Array {
                        element: Box::new(element.kind),
                        count,
                    },
                }
            }
            constants::DW_TAG_typedef => {
                if let Some((body_unit, body_offset)) = self.anonymous_aggregate(unit, &die)? {
                    let body = body_unit
                        .entry(body_offset)
                        .map_err(|err| map_dwarf_error("resolving typedef target", err))?;
                    TypeShape {
                        size: Self::entry_byte_size(&body)?,
                        kind: self
                            .entry_name(unit, &die)?
                            .map_or(FieldKind::Other, FieldKind::Struct),
                    }
                } else {
                    match Self::type_attr(&die)? {
                        Some(inner) => return self.shape_of(unit, inner, depth + 1),
                        None => TypeShape::opaque(),
                    }
                }
            }
            constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type
            | constants::DW_TAG_atomic_type => match Self::type_attr(&die)? {
                Some(inner) => return self.shape_of(unit, inner, depth + 1),
                None => TypeShape::opaque(),
            },
            _ => TypeShape {
                size,
                kind: FieldKind::Other,
            },
        };
        Ok(shape)
    }

    /// Follow typedefs and qualifiers to the underlying type DIE
    fn peel(&self, unit: &'a Unit<OwnedReader>, value: AttributeValue<OwnedReader>, depth: usize) -> CrashResult<Option<TypeRef<'a>>>
    {
        if depth >= MAX_TYPE_REF_DEPTH {
            return Ok(None);
        }
        let Some((unit, offset)) = self.resolve_ref(unit, value) else {
            return Ok(None);
        };
        let die = unit
            .entry(offset)
            .map_err(|err| map_dwarf_error("resolving type reference", err))?;
        match die.tag() {
            constants::DW_TAG_typedef
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type
            | constants::DW_TAG_atomic_type => match Self::type_attr(&die)? {
                Some(inner) => self.peel(unit, inner, depth + 1),
                None => Ok(None),
            },
            _ => Ok(Some((unit, offset))),
        }
    }

    /// Name of the struct/union behind a (possibly typedef'd) reference
    fn aggregate_name(&self, unit: &'a Unit<OwnedReader>, value: AttributeValue<OwnedReader>, depth: usize) -> CrashResult<Option<String>>
    {
        Ok(match self.shape_of(unit, value, depth)?.kind {
            FieldKind::Struct(name) => Some(name),
            _ => None,
        })
    }

    fn array_count(unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> CrashResult<u64>
    {
        let mut tree = unit
            .entries_tree(Some(offset))
            .map_err(|err| map_dwarf_error("building array tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating array root", err))?;
        let mut children = root.children();
        let mut total: Option<u64> = None;
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating array dimensions", err))?
        {
            let entry = child.entry();
            if entry.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            let count = if let Some(attr) = entry
                .attr(constants::DW_AT_count)
                .map_err(|err| map_dwarf_error("reading DW_AT_count", err))?
            {
                attr.udata_value().unwrap_or(0)
            } else if let Some(attr) = entry
                .attr(constants::DW_AT_upper_bound)
                .map_err(|err| map_dwarf_error("reading DW_AT_upper_bound", err))?
            {
                attr.udata_value().map_or(0, |bound| bound.saturating_add(1))
            } else {
                // flexible array member
                0
            };
            total = Some(total.map_or(count, |sofar| sofar.saturating_mul(count)));
        }
        Ok(total.unwrap_or(0))
    }

    fn resolve_ref(&self, unit: &'a Unit<OwnedReader>, value: AttributeValue<OwnedReader>) -> Option<TypeRef<'a>>
    {
        match value {
            AttributeValue::UnitRef(offset) => Some((unit, offset)),
            AttributeValue::DebugInfoRef(offset) => self.find_unit_for_offset(UnitSectionOffset::from(offset)),
            _ => None,
        }
    }

    fn find_unit_for_offset(&self, target: UnitSectionOffset<usize>) -> Option<TypeRef<'a>>
    {
        self.units
            .iter()
            .find_map(|unit| target.to_unit_offset(unit).map(|offset| (unit, offset)))
    }

    fn type_attr(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> CrashResult<Option<AttributeValue<OwnedReader>>>
    {
        Ok(entry
            .attr(constants::DW_AT_type)
            .map_err(|err| map_dwarf_error("reading DW_AT_type", err))?
            .map(|attr| attr.value()))
    }

    fn base_type_kind(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> CrashResult<FieldKind>
    {
        let encoding = entry
            .attr(constants::DW_AT_encoding)
            .map_err(|err| map_dwarf_error("reading DW_AT_encoding", err))?
            .map(|attr| attr.value());
        Ok(match encoding {
            Some(AttributeValue::Encoding(constants::DW_ATE_float | constants::DW_ATE_complex_float)) => FieldKind::Other,
            Some(AttributeValue::Encoding(constants::DW_ATE_signed | constants::DW_ATE_signed_char)) => {
                FieldKind::Integer { signed: true }
            }
            _ => FieldKind::Integer { signed: false },
        })
    }

    fn is_declaration(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> CrashResult<bool>
    {
        let attr = entry
            .attr(constants::DW_AT_declaration)
            .map_err(|err| map_dwarf_error("reading DW_AT_declaration", err))?;
        Ok(matches!(attr.map(|attr| attr.value()), Some(AttributeValue::Flag(true))))
    }

    fn entry_byte_size(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> CrashResult<Option<u64>>
    {
        Ok(entry
            .attr(constants::DW_AT_byte_size)
            .map_err(|err| map_dwarf_error("reading DW_AT_byte_size", err))?
            .and_then(|attr| attr.udata_value()))
    }

    fn entry_name(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    ) -> CrashResult<Option<String>>
    {
        let Some(attr) = entry
            .attr(constants::DW_AT_name)
            .map_err(|err| map_dwarf_error("reading DW_AT_name", err))?
        else {
            return Ok(None);
        };

        let reader = self
            .dwarf
            .attr_string(unit, attr.value())
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let owned = match reader.to_string() {
            Ok(cow) => cow.into_owned(),
            Err(_) => reader
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
                .into_owned(),
        };
        Ok(Some(owned))
    }
}
