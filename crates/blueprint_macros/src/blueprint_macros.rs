//! Blueprint Macros - Proc macros for node type declaration
//!
//! This crate provides the `#[blueprint_node]` attribute macro which turns a
//! node struct into a registrable node type: it derives the type id from the
//! struct name and catalog and generates the `NodeTypeInfo` with a factory
//! calling the struct's `new(&mut Graph)` constructor.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Expr, Ident, ItemStruct, Lit, Token,
};

/// Parsed attributes for the blueprint_node macro
struct BlueprintNodeAttrs {
    name: Option<String>,
    catalog: String,
    version: Option<Expr>,
    node_type: Option<Ident>,
    style: Option<Ident>,
}

impl Parse for BlueprintNodeAttrs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut name = None;
        let mut catalog = None;
        let mut version = None;
        let mut node_type = None;
        let mut style = None;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "name" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Str(s) = lit {
                        name = Some(s.value());
                    }
                }
                "catalog" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Str(s) = lit {
                        catalog = Some(s.value());
                    }
                }
                "version" => {
                    version = Some(input.parse::<Expr>()?);
                }
                "node_type" => {
                    node_type = Some(input.parse::<Ident>()?);
                }
                "style" => {
                    style = Some(input.parse::<Ident>()?);
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", ident),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(BlueprintNodeAttrs {
            name,
            catalog: catalog.ok_or_else(|| input.error("missing required attribute 'catalog'"))?,
            version,
            node_type,
            style,
        })
    }
}

/// Attribute macro declaring a blueprint node type.
///
/// # Attributes
///
/// - `catalog` (required): Catalog path (e.g., "System", "Math")
/// - `name` (optional): Type name (defaults to the struct name)
/// - `version` (optional): Packed version expression (defaults to `VERSION_BLUEPRINT`)
/// - `node_type` (optional): `NodeType` variant (default: `Internal`)
/// - `style` (optional): `NodeStyle` variant (default: `Default`)
///
/// # Example
///
/// ```ignore
/// #[blueprint_node(catalog = "System", node_type = EntryPoint, style = Simple)]
/// pub struct EntryPointNode {
///     base: NodeBase,
/// }
///
/// impl EntryPointNode {
///     pub fn new(graph: &mut Graph) -> Self { ... }
/// }
/// ```
///
/// This generates:
/// - `EntryPointNode::TYPE_ID` - FNV-1a hash of `"EntryPointNode*System"`
/// - `EntryPointNode::TYPE_NAME` and `EntryPointNode::CATALOG`
/// - `EntryPointNode::node_type_info() -> NodeTypeInfo` - descriptor with factory
#[proc_macro_attribute]
pub fn blueprint_node(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = parse_macro_input!(attr as BlueprintNodeAttrs);
    let input = parse_macro_input!(item as ItemStruct);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(&input.generics, "blueprint nodes cannot be generic")
            .to_compile_error()
            .into();
    }

    let ident = &input.ident;
    let type_name = attrs.name.unwrap_or_else(|| ident.to_string());
    let catalog = &attrs.catalog;

    let version = match attrs.version {
        Some(expr) => quote! { #expr },
        None => quote! { blueprint_runtime::blueprint_types::VERSION_BLUEPRINT },
    };
    let node_type = attrs
        .node_type
        .unwrap_or_else(|| Ident::new("Internal", proc_macro2::Span::call_site()));
    let style = attrs
        .style
        .unwrap_or_else(|| Ident::new("Default", proc_macro2::Span::call_site()));

    let output = quote! {
        #input

        impl #ident {
            /// Node type id (FNV-1a of "TypeName*Catalog")
            pub const TYPE_ID: u32 =
                blueprint_runtime::blueprint_types::node_type_id(#type_name, #catalog);
            /// Type name written to graph documents
            pub const TYPE_NAME: &'static str = #type_name;
            /// Catalog path
            pub const CATALOG: &'static str = #catalog;

            /// Type descriptor with a factory creating this node
            pub fn node_type_info() -> blueprint_runtime::NodeTypeInfo {
                blueprint_runtime::NodeTypeInfo::new(
                    #type_name,
                    #catalog,
                    #version,
                    blueprint_runtime::blueprint_types::NodeType::#node_type,
                    blueprint_runtime::blueprint_types::NodeStyle::#style,
                    |graph: &mut blueprint_runtime::Graph| -> Box<dyn blueprint_runtime::Node> {
                        Box::new(#ident::new(graph))
                    },
                )
            }
        }
    };

    output.into()
}
