//! XHTML文档树
//!
//! 基于quick-xml事件流构建RcDom，并按原样写回。
//! XML声明、DOCTYPE公共/系统标识和带前缀的命名空间声明在往返后保持不变；
//! script/style内容作为普通文本节点保存，不影响其后的兄弟节点

// 标准库导入
use std::cell::RefCell;
use std::rc::Rc;

// 第三方crate导入
use html5ever::tendril::StrTendril;
use html5ever::{ns, Attribute, LocalName, Namespace, Prefix, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

// 本地模块导入
use crate::epub_container::{resolve_entity, strip_bom};
use crate::error::Result;
use crate::translation_error;

/// 没有子节点时写成自闭合形式的HTML元素
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// 已打开元素上声明的命名空间绑定，前缀为空表示默认命名空间
#[derive(Default)]
struct NamespaceScopes {
    scopes: Vec<Vec<(String, String)>>,
}

impl NamespaceScopes {
    fn push(&mut self, bindings: Vec<(String, String)>) {
        self.scopes.push(bindings);
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, prefix: &str) -> Option<Namespace> {
        if prefix == "xml" {
            return Some(ns!(xml));
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|bindings| bindings.iter().rev())
            .find(|(bound, _)| bound == prefix)
            .filter(|(_, uri)| !uri.is_empty())
            .map(|(_, uri)| Namespace::from(uri.as_str()))
    }
}

/// 解析XHTML内容文档
pub fn parse_xhtml(bytes: &[u8], document: &str) -> Result<RcDom> {
    let content = std::str::from_utf8(strip_bom(bytes))
        .map_err(|e| translation_error!(html_parse, document, format!("非UTF-8内容: {}", e)))?;
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let dom = RcDom::default();
    let mut open: Vec<Handle> = Vec::new();
    let mut scopes = NamespaceScopes::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| translation_error!(html_parse, document, e))?;
        let parent = open.last().unwrap_or(&dom.document).clone();

        match event {
            Event::Start(e) => {
                let element = open_element(&e, &mut scopes);
                append(&parent, element.clone());
                open.push(element);
            }
            Event::Empty(e) => {
                let element = open_element(&e, &mut scopes);
                scopes.pop();
                append(&parent, element);
            }
            Event::End(_) => {
                if open.pop().is_none() {
                    return Err(translation_error!(html_parse, document, "多余的结束标签"));
                }
                scopes.pop();
            }
            Event::Text(e) => append_text(&parent, &String::from_utf8_lossy(&e)),
            Event::CData(e) => append_text(&parent, &String::from_utf8_lossy(&e)),
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(&e);
                match resolve_reference(&name) {
                    Some(resolved) => append_text(&parent, &resolved),
                    None => {
                        debug!("⚠️  未知实体引用 &{}; ({})", name, document);
                        append_text(&parent, &format!("&{};", name));
                    }
                }
            }
            Event::Comment(e) => append(
                &parent,
                Node::new(NodeData::Comment {
                    contents: StrTendril::from_slice(&String::from_utf8_lossy(&e)),
                }),
            ),
            Event::DocType(e) => append(&parent, doctype_node(&String::from_utf8_lossy(&e))),
            Event::Decl(e) => append(&parent, declaration_node(&e)),
            Event::PI(e) => append(
                &parent,
                Node::new(NodeData::ProcessingInstruction {
                    target: StrTendril::from_slice(&String::from_utf8_lossy(e.target())),
                    contents: StrTendril::from_slice(
                        String::from_utf8_lossy(e.content()).trim_start(),
                    ),
                }),
            ),
            Event::Eof => break,
        }
    }

    if let Some(unclosed) = open.last() {
        let name = match unclosed.data {
            NodeData::Element { ref name, .. } => name.local.to_string(),
            _ => String::new(),
        };
        return Err(translation_error!(html_parse, document, format!("元素未闭合: <{}>", name)));
    }
    Ok(dom)
}

/// 把DOM写回XHTML字节
pub fn serialize_xhtml(dom: &RcDom) -> Vec<u8> {
    let mut out = String::new();
    for child in dom.document.children.borrow().iter() {
        write_node(&mut out, child);
    }
    out.into_bytes()
}

fn open_element(start: &BytesStart<'_>, scopes: &mut NamespaceScopes) -> Handle {
    let mut bindings = Vec::new();
    let mut raw_attrs = Vec::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = unescape(&String::from_utf8_lossy(&attr.value));
        if key == "xmlns" {
            bindings.push((String::new(), value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.push((prefix.to_string(), value.clone()));
        }
        raw_attrs.push((key, value));
    }
    scopes.push(bindings);

    let raw_name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (prefix, local) = split_name(&raw_name);
    let namespace = scopes.lookup(prefix.unwrap_or("")).unwrap_or_else(|| {
        if let Some(prefix) = prefix {
            debug!("⚠️  未声明的命名空间前缀: {}", prefix);
        }
        ns!()
    });
    let name = QualName::new(prefix.map(Prefix::from), namespace, LocalName::from(local));

    let attrs = raw_attrs
        .iter()
        .map(|(key, value)| {
            let (prefix, local) = split_name(key);
            let namespace = match prefix {
                None if local == "xmlns" => ns!(xmlns),
                None => ns!(),
                Some("xmlns") => ns!(xmlns),
                Some(prefix) => scopes.lookup(prefix).unwrap_or_else(|| ns!()),
            };
            Attribute {
                name: QualName::new(prefix.map(Prefix::from), namespace, LocalName::from(local)),
                value: StrTendril::from_slice(value),
            }
        })
        .collect();

    Node::new(NodeData::Element {
        name,
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

fn append(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// 追加文本，与紧邻的前一个文本节点合并
fn append_text(parent: &Handle, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = parent.children.borrow().last() {
        if let NodeData::Text { ref contents } = last.data {
            contents.borrow_mut().push_slice(text);
            return;
        }
    }
    append(
        parent,
        Node::new(NodeData::Text {
            contents: RefCell::new(StrTendril::from_slice(text)),
        }),
    );
}

/// `html PUBLIC "pub" "sys"` / `html SYSTEM "sys"` / `html`
fn doctype_node(raw: &str) -> Handle {
    let raw = raw.trim();
    let (name, rest) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
    // 内部子集不保留
    let rest = rest.split_once('[').map_or(rest, |(head, _)| head).trim_start();
    let quoted = quoted_values(rest);

    let (public_id, system_id) = if rest.starts_with("PUBLIC") {
        (quoted.first().copied(), quoted.get(1).copied())
    } else if rest.starts_with("SYSTEM") {
        (None, quoted.first().copied())
    } else {
        (None, None)
    };

    Node::new(NodeData::Doctype {
        name: StrTendril::from_slice(name),
        public_id: StrTendril::from_slice(public_id.unwrap_or_default()),
        system_id: StrTendril::from_slice(system_id.unwrap_or_default()),
    })
}

fn quoted_values(text: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(['"', '\'']) {
        let quote = &rest[start..start + 1];
        let tail = &rest[start + 1..];
        let Some(end) = tail.find(quote) else {
            break;
        };
        values.push(&tail[..end]);
        rest = &tail[end + 1..];
    }
    values
}

/// XML声明以target为`xml`的处理指令保存；输出总是UTF-8
fn declaration_node(decl: &BytesDecl<'_>) -> Handle {
    let version = decl
        .version()
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_else(|_| "1.0".to_string());
    let mut contents = format!("version=\"{}\" encoding=\"utf-8\"", version);
    if let Some(Ok(standalone)) = decl.standalone() {
        contents.push_str(&format!(" standalone=\"{}\"", String::from_utf8_lossy(&standalone)));
    }

    Node::new(NodeData::ProcessingInstruction {
        target: StrTendril::from_slice("xml"),
        contents: StrTendril::from_slice(&contents),
    })
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// XML预定义实体、字符引用以及HTML命名实体
fn resolve_reference(name: &str) -> Option<String> {
    if let Some(resolved) = resolve_entity(name) {
        return Some(resolved);
    }
    let (first, second) = html5ever::data::NAMED_ENTITIES.get(format!("{};", name).as_str())?;
    [*first, *second]
        .into_iter()
        .filter(|&code| code != 0)
        .map(char::from_u32)
        .collect()
}

/// 属性值中的实体引用解码，无法识别的引用原样保留
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let resolved = tail
            .find(';')
            .and_then(|end| resolve_reference(&tail[..end]).map(|text| (end, text)));
        match resolved {
            Some((end, text)) => {
                out.push_str(&text);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn push_qualified(out: &mut String, name: &QualName) {
    if let Some(ref prefix) = name.prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(&name.local);
}

fn write_node(out: &mut String, node: &Handle) {
    match node.data {
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                write_node(out, child);
            }
        }
        NodeData::Doctype {
            ref name,
            ref public_id,
            ref system_id,
        } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            if !public_id.is_empty() {
                out.push_str(&format!(" PUBLIC \"{}\" \"{}\"", &**public_id, &**system_id));
            } else if !system_id.is_empty() {
                out.push_str(&format!(" SYSTEM \"{}\"", &**system_id));
            }
            out.push('>');
        }
        NodeData::Text { ref contents } => {
            let text = contents.borrow();
            out.push_str(&partial_escape(&**text));
        }
        NodeData::Comment { ref contents } => {
            out.push_str("<!--");
            out.push_str(contents);
            out.push_str("-->");
        }
        NodeData::ProcessingInstruction {
            ref target,
            ref contents,
        } => {
            out.push_str("<?");
            out.push_str(target);
            if !contents.is_empty() {
                out.push(' ');
                out.push_str(contents);
            }
            out.push_str("?>");
        }
        NodeData::Element {
            ref name,
            ref attrs,
            ..
        } => {
            out.push('<');
            push_qualified(out, name);
            for attr in attrs.borrow().iter() {
                out.push(' ');
                push_qualified(out, &attr.name);
                out.push_str("=\"");
                out.push_str(&escape(&*attr.value));
                out.push('"');
            }

            let children = node.children.borrow();
            let self_closing =
                name.ns != ns!(html) || VOID_ELEMENTS.contains(&name.local.as_ref());
            if children.is_empty() && self_closing {
                out.push_str("/>");
                return;
            }

            out.push('>');
            for child in children.iter() {
                write_node(out, child);
            }
            out.push_str("</");
            push_qualified(out, name);
            out.push('>');
        }
    }
}
