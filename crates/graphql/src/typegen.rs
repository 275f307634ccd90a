use crate::sample::Sample;
use crate::{ident, resolve, Accumulator, Error};
use async_graphql::dynamic::{Field, FieldFuture, InputValue, Object, Scalar, Schema, TypeRef};
use std::collections::BTreeMap;

/// The name of the pass-through scalar for arbitrary JSON values.
const JSON_SCALAR: &str = "JSON";

/// The shared object type behind every properties-patterned field.
const PROPERTY_TYPE: &str = "Property";

/// Kind tells a field's resolver how to present the extracted JSON value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Kind {
    /// Convert the value (a scalar, or a list of scalars) directly.
    Scalar,
    /// Pass the value through the JSON scalar; accepts a `jq:` argument.
    Json,
    /// Descend into a generated object type.
    Object,
    /// Descend into a list of a generated object type.
    ObjectList,
    /// A properties-patterned list; accepts a `type:` filter argument.
    Properties,
}

/// Generate the GraphQL schema for the accumulated blob shapes. One root
/// query field is installed per source schema, resolving through the sparse
/// index; object types are generated recursively from the shapes, memoized
/// by type name.
pub fn build_schema(accumulator: &Accumulator) -> Result<Schema, Error> {
    let mut generator = Generator::default();
    let mut query = Object::new("Query");

    for (source_schema, fields) in accumulator.schemas() {
        let type_name = ident::type_name(source_schema);
        generator.object_type(&type_name, fields);

        let source = source_schema.clone();
        query = query.field(
            Field::new(
                ident::root_field_name(source_schema),
                TypeRef::named_list(type_name),
                move |ctx| {
                    let source = source.clone();
                    FieldFuture::new(resolve::root(ctx, source))
                },
            )
            .argument(InputValue::new("name", TypeRef::named(TypeRef::STRING)))
            .argument(InputValue::new("package", TypeRef::named(TypeRef::STRING))),
        );
    }

    let mut builder = Schema::build("Query", None, None)
        .register(Scalar::new(JSON_SCALAR))
        .register(query);
    for (_, object) in generator.objects {
        builder = builder.register(object);
    }
    let schema = builder
        .finish()
        .map_err(|err| Error::Build(err.to_string()))?;
    tracing::debug!(
        source_schemas = accumulator.schemas().len(),
        "generated catalog query schema"
    );
    Ok(schema)
}

#[derive(Default)]
struct Generator {
    // Generated object types, memoized by name so one name is registered
    // exactly once.
    objects: BTreeMap<String, Object>,
}

impl Generator {
    fn object_type(&mut self, name: &str, fields: &BTreeMap<String, Sample>) {
        if self.objects.contains_key(name) {
            return;
        }

        let mut object = Object::new(name);
        for (src_key, sample) in fields {
            let gql_name = ident::field_name(src_key);
            let (type_ref, kind) = self.field_type(name, &gql_name, sample);

            let src_key = src_key.clone();
            let resolved_as = kind.clone();
            let mut field = Field::new(gql_name, type_ref, move |ctx| {
                let src_key = src_key.clone();
                let resolved_as = resolved_as.clone();
                FieldFuture::new(resolve::field(ctx, src_key, resolved_as))
            });
            if kind == Kind::Json {
                field = field.argument(InputValue::new("jq", TypeRef::named(TypeRef::STRING)));
            }
            if kind == Kind::Properties {
                field = field.argument(InputValue::new("type", TypeRef::named(TypeRef::STRING)));
            }
            object = object.field(field);
        }
        self.objects.insert(name.to_string(), object);
    }

    fn field_type(&mut self, parent: &str, field: &str, sample: &Sample) -> (TypeRef, Kind) {
        match sample {
            Sample::Null | Sample::Str => (TypeRef::named(TypeRef::STRING), Kind::Scalar),
            Sample::Bool => (TypeRef::named(TypeRef::BOOLEAN), Kind::Scalar),
            Sample::Int => (TypeRef::named(TypeRef::INT), Kind::Scalar),
            Sample::Float => (TypeRef::named(TypeRef::FLOAT), Kind::Scalar),
            Sample::Any => (TypeRef::named(JSON_SCALAR), Kind::Json),
            Sample::Properties => {
                self.property_type();
                (TypeRef::named_list(PROPERTY_TYPE), Kind::Properties)
            }
            Sample::Object(fields) => {
                if degrades(fields) {
                    return (TypeRef::named(JSON_SCALAR), Kind::Json);
                }
                let nested = format!("{parent}{}", ident::title(field));
                self.object_type(&nested, fields);
                (TypeRef::named(nested), Kind::Object)
            }
            Sample::Array(None) => (TypeRef::named_list(JSON_SCALAR), Kind::Scalar),
            Sample::Array(Some(element)) => self.list_type(parent, field, element),
        }
    }

    fn list_type(&mut self, parent: &str, field: &str, element: &Sample) -> (TypeRef, Kind) {
        match element {
            Sample::Object(fields) if !degrades(fields) => {
                let nested = format!("{parent}{}", ident::title(field));
                self.object_type(&nested, fields);
                (TypeRef::named_list(nested), Kind::ObjectList)
            }
            Sample::Object(_) => (TypeRef::named_list(JSON_SCALAR), Kind::Scalar),
            element => match scalar_ref(element) {
                Some(element_ref) => (TypeRef::List(Box::new(element_ref)), Kind::Scalar),
                // Structured types nested below one list level degrade to
                // one opaque JSON value.
                None => (TypeRef::named(JSON_SCALAR), Kind::Json),
            },
        }
    }

    // The Property type carries the `{type, value}` member shape shared by
    // every properties-patterned field.
    fn property_type(&mut self) {
        if self.objects.contains_key(PROPERTY_TYPE) {
            return;
        }
        let fields: BTreeMap<String, Sample> = [
            ("type".to_string(), Sample::Str),
            ("value".to_string(), Sample::Any),
        ]
        .into();
        self.object_type(PROPERTY_TYPE, &fields);
    }
}

// An object degrades to the JSON scalar when it has no keys, or a key that
// is not usable as a GraphQL identifier.
fn degrades(fields: &BTreeMap<String, Sample>) -> bool {
    fields.is_empty() || fields.keys().any(|key| !ident::is_valid(key))
}

fn scalar_ref(sample: &Sample) -> Option<TypeRef> {
    match sample {
        Sample::Null | Sample::Str => Some(TypeRef::named(TypeRef::STRING)),
        Sample::Bool => Some(TypeRef::named(TypeRef::BOOLEAN)),
        Sample::Int => Some(TypeRef::named(TypeRef::INT)),
        Sample::Float => Some(TypeRef::named(TypeRef::FLOAT)),
        Sample::Any => Some(TypeRef::named(JSON_SCALAR)),
        Sample::Array(None) => Some(TypeRef::named_list(JSON_SCALAR)),
        Sample::Array(Some(element)) => {
            Some(TypeRef::List(Box::new(scalar_ref(element)?)))
        }
        Sample::Object(_) | Sample::Properties => None,
    }
}
